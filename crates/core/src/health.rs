//! Composite account health scoring.
//!
//! Five operational inputs are mapped onto 0-100 component scores through
//! step thresholds, combined with fixed weights into an overall score, then
//! bucketed into a [`HealthRating`]. All functions here are pure; history and
//! trend bookkeeping live in the monitor crate.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::threshold_validation::{validate_monotonic, validate_unit_range};
use crate::types::{AccountId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Component score awarded at each step of a threshold ladder.
pub const SCORE_EXCELLENT: u8 = 100;
pub const SCORE_GOOD: u8 = 80;
pub const SCORE_FAIR: u8 = 60;
pub const SCORE_POOR: u8 = 40;
pub const SCORE_FLOOR: u8 = 20;

/// Lower bounds of the rating gauge. Anything below `RATING_POOR` is critical.
pub const RATING_EXCELLENT: u8 = 90;
pub const RATING_GOOD: u8 = 75;
pub const RATING_FAIR: u8 = 60;
pub const RATING_POOR: u8 = 40;

/// Overall score reported when no account has been scored yet.
pub const NEUTRAL_SYSTEM_SCORE: f64 = 50.0;

/// Absolute score change below which the trend is `Stable`.
pub const DEFAULT_STABLE_BAND: i32 = 2;

/// Tolerance when checking that weights sum to one.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Whether a larger input value is healthier or unhealthier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// Step thresholds for one input metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    pub direction: Direction,
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

impl MetricThresholds {
    pub const fn higher_is_better(excellent: f64, good: f64, fair: f64, poor: f64) -> Self {
        Self {
            direction: Direction::HigherIsBetter,
            excellent,
            good,
            fair,
            poor,
        }
    }

    pub const fn lower_is_better(excellent: f64, good: f64, fair: f64, poor: f64) -> Self {
        Self {
            direction: Direction::LowerIsBetter,
            excellent,
            good,
            fair,
            poor,
        }
    }

    /// Map a raw input value onto a component score.
    ///
    /// Non-finite values fall through every step and score [`SCORE_FLOOR`].
    pub fn score(&self, value: f64) -> u8 {
        let passes = |limit: f64| match self.direction {
            Direction::HigherIsBetter => value >= limit,
            Direction::LowerIsBetter => value <= limit,
        };
        if passes(self.excellent) {
            SCORE_EXCELLENT
        } else if passes(self.good) {
            SCORE_GOOD
        } else if passes(self.fair) {
            SCORE_FAIR
        } else if passes(self.poor) {
            SCORE_POOR
        } else {
            SCORE_FLOOR
        }
    }

    /// The ladder must be ordered from the healthiest step to the weakest.
    pub fn validate(&self, name: &str) -> Result<(), CoreError> {
        let steps = [self.excellent, self.good, self.fair, self.poor];
        match self.direction {
            Direction::HigherIsBetter => validate_monotonic(&steps, false, name),
            Direction::LowerIsBetter => validate_monotonic(&steps, true, name),
        }
    }
}

/// Threshold ladders for every health input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub uptime: MetricThresholds,
    pub qr_regen_rate: MetricThresholds,
    pub error_rate: MetricThresholds,
    pub response_time_ms: MetricThresholds,
    pub message_success: MetricThresholds,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            uptime: MetricThresholds::higher_is_better(0.99, 0.95, 0.90, 0.80),
            qr_regen_rate: MetricThresholds::lower_is_better(0.05, 0.10, 0.20, 0.35),
            error_rate: MetricThresholds::lower_is_better(0.01, 0.03, 0.05, 0.10),
            response_time_ms: MetricThresholds::lower_is_better(
                5_000.0, 10_000.0, 20_000.0, 30_000.0,
            ),
            message_success: MetricThresholds::higher_is_better(0.98, 0.95, 0.90, 0.80),
        }
    }
}

impl HealthThresholds {
    pub fn validate(&self) -> Result<(), CoreError> {
        self.uptime.validate("uptime")?;
        self.qr_regen_rate.validate("qr_regen_rate")?;
        self.error_rate.validate("error_rate")?;
        self.response_time_ms.validate("response_time_ms")?;
        self.message_success.validate("message_success")
    }
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Relative weight of each component in the overall score. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub uptime: f64,
    pub qr_quality: f64,
    pub error_rate: f64,
    pub response_time: f64,
    pub message_processing: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            uptime: 0.30,
            qr_quality: 0.25,
            error_rate: 0.20,
            response_time: 0.15,
            message_processing: 0.10,
        }
    }
}

impl HealthWeights {
    pub fn sum(&self) -> f64 {
        self.uptime + self.qr_quality + self.error_rate + self.response_time + self.message_processing
    }

    /// Every weight must be in `(0, 1]` and together they must sum to 1.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, w) in [
            ("uptime weight", self.uptime),
            ("qr_quality weight", self.qr_quality),
            ("error_rate weight", self.error_rate),
            ("response_time weight", self.response_time),
            ("message_processing weight", self.message_processing),
        ] {
            validate_unit_range(w, name)?;
            if w == 0.0 {
                return Err(CoreError::Configuration(format!("{name} must be positive")));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CoreError::Configuration(format!(
                "health weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inputs and component scores
// ---------------------------------------------------------------------------

/// Raw operational inputs for one account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthInputs {
    pub uptime_ratio: f64,
    pub qr_regen_rate: f64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub message_success_rate: f64,
}

/// A scored component of the overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Uptime,
    QrQuality,
    ErrorRate,
    ResponseTime,
    MessageProcessing,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Uptime => "uptime",
            Component::QrQuality => "qr_quality",
            Component::ErrorRate => "error_rate",
            Component::ResponseTime => "response_time",
            Component::MessageProcessing => "message_processing",
        }
    }
}

/// Per-component scores, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub uptime: u8,
    pub qr_quality: u8,
    pub error_rate: u8,
    pub response_time: u8,
    pub message_processing: u8,
}

impl ComponentScores {
    pub fn entries(&self) -> [(Component, u8); 5] {
        [
            (Component::Uptime, self.uptime),
            (Component::QrQuality, self.qr_quality),
            (Component::ErrorRate, self.error_rate),
            (Component::ResponseTime, self.response_time),
            (Component::MessageProcessing, self.message_processing),
        ]
    }
}

/// Score every input against its ladder.
pub fn score_components(inputs: &HealthInputs, thresholds: &HealthThresholds) -> ComponentScores {
    ComponentScores {
        uptime: thresholds.uptime.score(inputs.uptime_ratio),
        qr_quality: thresholds.qr_regen_rate.score(inputs.qr_regen_rate),
        error_rate: thresholds.error_rate.score(inputs.error_rate),
        response_time: thresholds.response_time_ms.score(inputs.avg_response_time_ms),
        message_processing: thresholds.message_success.score(inputs.message_success_rate),
    }
}

/// Weighted sum of component scores, rounded and clamped to `[0, 100]`.
pub fn overall_score(scores: &ComponentScores, weights: &HealthWeights) -> u8 {
    let weighted = weights.uptime * scores.uptime as f64
        + weights.qr_quality * scores.qr_quality as f64
        + weights.error_rate * scores.error_rate as f64
        + weights.response_time * scores.response_time as f64
        + weights.message_processing * scores.message_processing as f64;
    weighted.round().clamp(0.0, 100.0) as u8
}

// ---------------------------------------------------------------------------
// Rating
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthRating {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthRating {
    /// Bucket an overall score. Every value in `0..=100` lands in exactly
    /// one bucket; values above 100 rate as excellent.
    pub fn from_score(score: u8) -> Self {
        if score >= RATING_EXCELLENT {
            HealthRating::Excellent
        } else if score >= RATING_GOOD {
            HealthRating::Good
        } else if score >= RATING_FAIR {
            HealthRating::Fair
        } else if score >= RATING_POOR {
            HealthRating::Poor
        } else {
            HealthRating::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthRating::Excellent => "EXCELLENT",
            HealthRating::Good => "GOOD",
            HealthRating::Fair => "FAIR",
            HealthRating::Poor => "POOR",
            HealthRating::Critical => "CRITICAL",
        }
    }
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Signed change against the previous score.
    pub change: i32,
}

impl Trend {
    pub const fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            change: 0,
        }
    }
}

/// Compare against the previous overall score, if any.
pub fn compute_trend(current: u8, previous: Option<u8>, stable_band: i32) -> Trend {
    let Some(previous) = previous else {
        return Trend::stable();
    };
    let change = current as i32 - previous as i32;
    let direction = if change.abs() < stable_band {
        TrendDirection::Stable
    } else if change > 0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };
    Trend { direction, change }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecommendation {
    pub component: Component,
    pub priority: RecommendationPriority,
    pub description: String,
}

fn advice(component: Component) -> &'static str {
    match component {
        Component::Uptime => {
            "Check the device connection and restart the session if it keeps dropping"
        }
        Component::QrQuality => {
            "Linking codes expire too often; raise the scan timeout or re-link from a stable device"
        }
        Component::ErrorRate => {
            "Inspect recent errors for network or rate-limit causes and back off sending"
        }
        Component::ResponseTime => {
            "Responses are slow; reduce concurrent sends or check host resource usage"
        }
        Component::MessageProcessing => {
            "Delivery success is low; verify recipient numbers and account standing"
        }
    }
}

/// One recommendation per component scoring below [`SCORE_GOOD`].
pub fn recommendations(scores: &ComponentScores) -> Vec<HealthRecommendation> {
    scores
        .entries()
        .into_iter()
        .filter(|(_, score)| *score < SCORE_GOOD)
        .map(|(component, score)| HealthRecommendation {
            component,
            priority: if score <= SCORE_POOR {
                RecommendationPriority::High
            } else {
                RecommendationPriority::Medium
            },
            description: advice(component).to_string(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One health evaluation of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub account_id: AccountId,
    pub timestamp: Timestamp,
    pub inputs: HealthInputs,
    pub component_scores: ComponentScores,
    pub overall_score: u8,
    pub rating: HealthRating,
    pub trend: Trend,
    pub recommendations: Vec<HealthRecommendation>,
}

/// Score `inputs` and assemble a report, trending against `previous`.
pub fn build_report(
    account_id: &str,
    inputs: HealthInputs,
    previous: Option<&HealthReport>,
    thresholds: &HealthThresholds,
    weights: &HealthWeights,
    stable_band: i32,
    now: Timestamp,
) -> HealthReport {
    let component_scores = score_components(&inputs, thresholds);
    let overall = overall_score(&component_scores, weights);
    HealthReport {
        account_id: account_id.to_string(),
        timestamp: now,
        inputs,
        component_scores,
        overall_score: overall,
        rating: HealthRating::from_score(overall),
        trend: compute_trend(overall, previous.map(|p| p.overall_score), stable_band),
        recommendations: recommendations(&component_scores),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn excellent_inputs() -> HealthInputs {
        HealthInputs {
            uptime_ratio: 0.999,
            qr_regen_rate: 0.01,
            error_rate: 0.001,
            avg_response_time_ms: 4000.0,
            message_success_rate: 0.99,
        }
    }

    fn uniform(score: u8) -> ComponentScores {
        ComponentScores {
            uptime: score,
            qr_quality: score,
            error_rate: score,
            response_time: score,
            message_processing: score,
        }
    }

    #[test]
    fn excellent_inputs_score_one_hundred() {
        let scores = score_components(&excellent_inputs(), &HealthThresholds::default());
        assert_eq!(scores, uniform(100));
        let overall = overall_score(&scores, &HealthWeights::default());
        assert_eq!(overall, 100);
        assert_eq!(HealthRating::from_score(overall), HealthRating::Excellent);
    }

    #[test]
    fn ladder_steps_higher_is_better() {
        let t = MetricThresholds::higher_is_better(0.99, 0.95, 0.90, 0.80);
        assert_eq!(t.score(0.99), 100);
        assert_eq!(t.score(0.96), 80);
        assert_eq!(t.score(0.90), 60);
        assert_eq!(t.score(0.85), 40);
        assert_eq!(t.score(0.10), 20);
        assert_eq!(t.score(f64::NAN), 20);
    }

    #[test]
    fn ladder_steps_lower_is_better() {
        let t = MetricThresholds::lower_is_better(5000.0, 10000.0, 20000.0, 30000.0);
        assert_eq!(t.score(0.0), 100);
        assert_eq!(t.score(7000.0), 80);
        assert_eq!(t.score(20000.0), 60);
        assert_eq!(t.score(25000.0), 40);
        assert_eq!(t.score(90000.0), 20);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let weights = HealthWeights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn weights_not_summing_to_one_are_rejected() {
        let weights = HealthWeights {
            uptime: 0.5,
            ..HealthWeights::default()
        };
        assert!(matches!(weights.validate(), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn unordered_ladder_is_rejected() {
        let mut thresholds = HealthThresholds::default();
        thresholds.error_rate = MetricThresholds::lower_is_better(0.1, 0.05, 0.2, 0.3);
        assert!(thresholds.validate().is_err());
        assert!(HealthThresholds::default().validate().is_ok());
    }

    #[test]
    fn overall_is_monotonic_in_each_component() {
        let weights = HealthWeights::default();
        let steps = [SCORE_FLOOR, SCORE_POOR, SCORE_FAIR, SCORE_GOOD, SCORE_EXCELLENT];
        for base in steps {
            for idx in 0..5 {
                let mut previous = 0;
                for step in steps {
                    let mut scores = uniform(base);
                    match idx {
                        0 => scores.uptime = step,
                        1 => scores.qr_quality = step,
                        2 => scores.error_rate = step,
                        3 => scores.response_time = step,
                        _ => scores.message_processing = step,
                    }
                    let overall = overall_score(&scores, &weights);
                    assert!(overall >= previous, "component {idx} base {base} step {step}");
                    previous = overall;
                }
            }
        }
    }

    #[test]
    fn rating_buckets_cover_whole_range_contiguously() {
        let mut previous = HealthRating::from_score(0);
        assert_eq!(previous, HealthRating::Critical);
        for score in 1..=100u8 {
            let rating = HealthRating::from_score(score);
            // Ratings only ever step up by one bucket as the score rises.
            assert!(rating >= previous);
            assert!((rating as i32) - (previous as i32) <= 1);
            previous = rating;
        }
        assert_eq!(previous, HealthRating::Excellent);
        assert_eq!(HealthRating::from_score(89), HealthRating::Good);
        assert_eq!(HealthRating::from_score(39), HealthRating::Critical);
        assert_eq!(HealthRating::from_score(40), HealthRating::Poor);
    }

    #[test]
    fn trend_uses_stable_band() {
        assert_eq!(compute_trend(80, None, 2), Trend::stable());
        assert_eq!(compute_trend(81, Some(80), 2).direction, TrendDirection::Stable);
        let up = compute_trend(85, Some(80), 2);
        assert_eq!(up.direction, TrendDirection::Up);
        assert_eq!(up.change, 5);
        let down = compute_trend(70, Some(80), 2);
        assert_eq!(down.direction, TrendDirection::Down);
        assert_eq!(down.change, -10);
    }

    #[test]
    fn recommendations_only_for_weak_components() {
        let scores = ComponentScores {
            uptime: 100,
            qr_quality: 60,
            error_rate: 80,
            response_time: 20,
            message_processing: 100,
        };
        let recs = recommendations(&scores);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].component, Component::QrQuality);
        assert_eq!(recs[0].priority, RecommendationPriority::Medium);
        assert_eq!(recs[1].component, Component::ResponseTime);
        assert_eq!(recs[1].priority, RecommendationPriority::High);
        assert!(!recs[1].description.is_empty());
    }

    #[test]
    fn build_report_trends_against_previous() {
        let now = chrono::Utc::now();
        let thresholds = HealthThresholds::default();
        let weights = HealthWeights::default();
        let first = build_report("A", excellent_inputs(), None, &thresholds, &weights, 2, now);
        assert_eq!(first.trend, Trend::stable());

        let degraded = HealthInputs {
            uptime_ratio: 0.5,
            ..excellent_inputs()
        };
        let second = build_report("A", degraded, Some(&first), &thresholds, &weights, 2, now);
        assert_eq!(second.component_scores.uptime, 20);
        assert_eq!(second.overall_score, 76);
        assert_eq!(second.rating, HealthRating::Good);
        assert_eq!(second.trend.direction, TrendDirection::Down);
        assert_eq!(second.trend.change, -24);
        assert_eq!(second.recommendations.len(), 1);
    }
}
