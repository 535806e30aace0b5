//! Rule-based anomaly detection for monitored accounts.
//!
//! Each rule inspects one aspect of a [`DiagnosticContext`] and fires at most
//! one [`DiagnosticIssue`]. Rules are individually toggleable and carry their
//! own threshold and base severity. An observation beyond twice the threshold
//! escalates the severity by one level.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::threshold_validation::{validate_positive, validate_unit_range};
use crate::types::{AccountId, Timestamp};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }

    /// Whether issues of this severity should page someone.
    pub fn is_alerting(self) -> bool {
        self >= Severity::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Overall severity of a diagnostic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportSeverity {
    Healthy,
    Low,
    Medium,
    High,
    Critical,
}

impl From<Severity> for ReportSeverity {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Low => ReportSeverity::Low,
            Severity::Medium => ReportSeverity::Medium,
            Severity::High => ReportSeverity::High,
            Severity::Critical => ReportSeverity::Critical,
        }
    }
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    SlowScan,
    FrequentRegeneration,
    NetworkIssue,
    LockContention,
    StaleSession,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::SlowScan => "slow_scan",
            IssueType::FrequentRegeneration => "frequent_regeneration",
            IssueType::NetworkIssue => "network_issue",
            IssueType::LockContention => "lock_contention",
            IssueType::StaleSession => "stale_session",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub observed_value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecommendation {
    pub issue_type: IssueType,
    pub action: String,
    pub expected_improvement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub account_id: AccountId,
    pub timestamp: Timestamp,
    pub issues: Vec<DiagnosticIssue>,
    pub severity: ReportSeverity,
    pub recommendations: Vec<DiagnosticRecommendation>,
}

impl DiagnosticReport {
    /// Issues severe enough to dispatch a notification for.
    pub fn alerting_issues(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues.iter().filter(|i| i.severity.is_alerting())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for one rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub severity: Severity,
    /// Observation window in seconds (unused by rules that have none).
    pub window_secs: u64,
}

impl RuleConfig {
    pub const fn new(threshold: f64, severity: Severity, window_secs: u64) -> Self {
        Self {
            enabled: true,
            threshold,
            severity,
            window_secs,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    /// Base severity, escalated once when `observed > 2 × threshold`.
    fn severity_for(&self, observed: f64) -> Severity {
        if observed > self.threshold * 2.0 {
            self.severity.escalate()
        } else {
            self.severity
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Threshold is the mean scan duration in ms.
    pub slow_scan: RuleConfig,
    /// Secondary slow-scan trigger on the 95th percentile, in ms.
    pub slow_scan_p95_ms: f64,
    /// Threshold is the number of regenerations within the window.
    pub frequent_regeneration: RuleConfig,
    /// Threshold is the error ratio within the window.
    pub network_issue: RuleConfig,
    /// Fewer operations than this in the window never trigger `network_issue`.
    pub network_min_events: u32,
    /// Threshold is the number of failed lock acquisitions within the window.
    pub lock_contention: RuleConfig,
    /// Threshold is seconds since last activity.
    pub stale_session: RuleConfig,
    pub history_limit: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            slow_scan: RuleConfig::new(45_000.0, Severity::Medium, 0),
            slow_scan_p95_ms: 60_000.0,
            frequent_regeneration: RuleConfig::new(5.0, Severity::High, 600),
            network_issue: RuleConfig::new(0.2, Severity::High, 300),
            network_min_events: 5,
            lock_contention: RuleConfig::new(3.0, Severity::Medium, 60),
            stale_session: RuleConfig::new(1_800.0, Severity::Medium, 0),
            history_limit: 20,
        }
    }
}

impl DiagnosticsConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_positive(self.slow_scan.threshold, "slow_scan threshold")?;
        validate_positive(self.slow_scan_p95_ms, "slow_scan p95 threshold")?;
        validate_positive(self.frequent_regeneration.threshold, "frequent_regeneration threshold")?;
        validate_positive(
            self.frequent_regeneration.window_secs as f64,
            "frequent_regeneration window",
        )?;
        validate_unit_range(self.network_issue.threshold, "network_issue threshold")?;
        validate_positive(self.network_issue.window_secs as f64, "network_issue window")?;
        validate_positive(self.lock_contention.threshold, "lock_contention threshold")?;
        validate_positive(self.lock_contention.window_secs as f64, "lock_contention window")?;
        validate_positive(self.stale_session.threshold, "stale_session threshold")?;
        if self.history_limit == 0 {
            return Err(CoreError::Configuration(
                "diagnostics history_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Recent scan statistics fed into the slow-scan rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub mean_ms: f64,
    pub p95_ms: f64,
}

/// Everything the rules look at for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticContext {
    pub account_id: AccountId,
    pub now: Timestamp,
    /// `None` while the account lacks enough samples.
    pub scan: Option<ScanSnapshot>,
    pub regenerations_in_window: u32,
    pub errors_in_window: u32,
    /// Errors plus successful operations in the network window.
    pub operations_in_window: u32,
    pub lock_failures_in_window: u32,
    pub last_activity: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn slow_scan(ctx: &DiagnosticContext, cfg: &DiagnosticsConfig) -> Option<DiagnosticIssue> {
    let rule = &cfg.slow_scan;
    let scan = ctx.scan?;
    let mean_over = scan.mean_ms > rule.threshold;
    let p95_over = scan.p95_ms > cfg.slow_scan_p95_ms;
    if !mean_over && !p95_over {
        return None;
    }
    let doubled = scan.mean_ms > rule.threshold * 2.0 || scan.p95_ms > cfg.slow_scan_p95_ms * 2.0;
    Some(DiagnosticIssue {
        issue_type: IssueType::SlowScan,
        severity: if doubled {
            rule.severity.escalate()
        } else {
            rule.severity
        },
        description: format!(
            "Scans are slow: mean {:.0} ms (limit {:.0}), p95 {:.0} ms (limit {:.0})",
            scan.mean_ms, rule.threshold, scan.p95_ms, cfg.slow_scan_p95_ms
        ),
        observed_value: scan.mean_ms,
        threshold: rule.threshold,
    })
}

fn frequent_regeneration(
    ctx: &DiagnosticContext,
    cfg: &DiagnosticsConfig,
) -> Option<DiagnosticIssue> {
    let rule = &cfg.frequent_regeneration;
    let observed = ctx.regenerations_in_window as f64;
    (observed > rule.threshold).then(|| DiagnosticIssue {
        issue_type: IssueType::FrequentRegeneration,
        severity: rule.severity_for(observed),
        description: format!(
            "Linking code regenerated {} times in {} s (limit {:.0})",
            ctx.regenerations_in_window, rule.window_secs, rule.threshold
        ),
        observed_value: observed,
        threshold: rule.threshold,
    })
}

fn network_issue(ctx: &DiagnosticContext, cfg: &DiagnosticsConfig) -> Option<DiagnosticIssue> {
    let rule = &cfg.network_issue;
    if ctx.operations_in_window == 0 || ctx.operations_in_window < cfg.network_min_events {
        return None;
    }
    let rate = ctx.errors_in_window as f64 / ctx.operations_in_window as f64;
    (rate > rule.threshold).then(|| DiagnosticIssue {
        issue_type: IssueType::NetworkIssue,
        severity: rule.severity_for(rate),
        description: format!(
            "Error rate {:.1}% over the last {} s ({} of {} operations)",
            rate * 100.0,
            rule.window_secs,
            ctx.errors_in_window,
            ctx.operations_in_window
        ),
        observed_value: rate,
        threshold: rule.threshold,
    })
}

fn lock_contention(ctx: &DiagnosticContext, cfg: &DiagnosticsConfig) -> Option<DiagnosticIssue> {
    let rule = &cfg.lock_contention;
    let observed = ctx.lock_failures_in_window as f64;
    (observed > rule.threshold).then(|| DiagnosticIssue {
        issue_type: IssueType::LockContention,
        severity: rule.severity_for(observed),
        description: format!(
            "Session lock acquisition failed {} times within {} s",
            ctx.lock_failures_in_window, rule.window_secs
        ),
        observed_value: observed,
        threshold: rule.threshold,
    })
}

fn stale_session(ctx: &DiagnosticContext, cfg: &DiagnosticsConfig) -> Option<DiagnosticIssue> {
    let rule = &cfg.stale_session;
    let last = ctx.last_activity?;
    let idle_secs = (ctx.now - last).num_seconds().max(0) as f64;
    (idle_secs > rule.threshold).then(|| DiagnosticIssue {
        issue_type: IssueType::StaleSession,
        severity: rule.severity_for(idle_secs),
        description: format!(
            "No activity for {:.0} s (limit {:.0} s)",
            idle_secs, rule.threshold
        ),
        observed_value: idle_secs,
        threshold: rule.threshold,
    })
}

type Rule = fn(&DiagnosticContext, &DiagnosticsConfig) -> Option<DiagnosticIssue>;

fn rules(cfg: &DiagnosticsConfig) -> Vec<Rule> {
    let mut active: Vec<Rule> = Vec::with_capacity(5);
    if cfg.slow_scan.enabled {
        active.push(slow_scan);
    }
    if cfg.frequent_regeneration.enabled {
        active.push(frequent_regeneration);
    }
    if cfg.network_issue.enabled {
        active.push(network_issue);
    }
    if cfg.lock_contention.enabled {
        active.push(lock_contention);
    }
    if cfg.stale_session.enabled {
        active.push(stale_session);
    }
    active
}

/// Run every enabled rule against `ctx`.
pub fn evaluate(ctx: &DiagnosticContext, cfg: &DiagnosticsConfig) -> Vec<DiagnosticIssue> {
    rules(cfg).into_iter().filter_map(|rule| rule(ctx, cfg)).collect()
}

/// Maximum issue severity, or `Healthy` when nothing fired.
pub fn report_severity(issues: &[DiagnosticIssue]) -> ReportSeverity {
    issues
        .iter()
        .map(|i| ReportSeverity::from(i.severity))
        .max()
        .unwrap_or(ReportSeverity::Healthy)
}

/// The remediation for an issue type.
pub fn recommendation_for(issue_type: IssueType) -> DiagnosticRecommendation {
    let (action, expected) = match issue_type {
        IssueType::SlowScan => (
            "Raise the scan timeout to the recommended value and check the linking device's network",
            "Fewer scan timeouts and regenerations",
        ),
        IssueType::FrequentRegeneration => (
            "Pause automatic re-linking and re-scan manually from a stable device",
            "Regeneration count back under the limit within one window",
        ),
        IssueType::NetworkIssue => (
            "Check host connectivity and proxy settings, then back off sending",
            "Error rate below the threshold on the next check",
        ),
        IssueType::LockContention => (
            "Make sure only one process drives this account and clear stale session locks",
            "Lock acquisitions succeed on first attempt",
        ),
        IssueType::StaleSession => (
            "Restart the session or re-link the account",
            "Activity resumes and the session is marked live",
        ),
    };
    DiagnosticRecommendation {
        issue_type,
        action: action.to_string(),
        expected_improvement: expected.to_string(),
    }
}

/// Evaluate `ctx` and assemble a full report.
pub fn diagnose(ctx: &DiagnosticContext, cfg: &DiagnosticsConfig) -> DiagnosticReport {
    let issues = evaluate(ctx, cfg);
    let severity = report_severity(&issues);
    let recommendations = issues
        .iter()
        .map(|i| recommendation_for(i.issue_type))
        .collect();
    DiagnosticReport {
        account_id: ctx.account_id.clone(),
        timestamp: ctx.now,
        issues,
        severity,
        recommendations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_context() -> DiagnosticContext {
        let now = chrono::Utc::now();
        DiagnosticContext {
            account_id: "A".to_string(),
            now,
            scan: Some(ScanSnapshot {
                mean_ms: 10_000.0,
                p95_ms: 15_000.0,
            }),
            regenerations_in_window: 0,
            errors_in_window: 0,
            operations_in_window: 20,
            lock_failures_in_window: 0,
            last_activity: Some(now),
        }
    }

    #[test]
    fn no_rules_fired_is_healthy() {
        let report = diagnose(&quiet_context(), &DiagnosticsConfig::default());
        assert!(report.issues.is_empty());
        assert_eq!(report.severity, ReportSeverity::Healthy);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn escalation_doubles_threshold() {
        let cfg = DiagnosticsConfig::default();
        let mut ctx = quiet_context();
        ctx.regenerations_in_window = 6;
        let issues = evaluate(&ctx, &cfg);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);

        ctx.regenerations_in_window = 11;
        let issues = evaluate(&ctx, &cfg);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn any_critical_makes_report_critical() {
        let cfg = DiagnosticsConfig::default();
        let mut ctx = quiet_context();
        ctx.regenerations_in_window = 20;
        ctx.lock_failures_in_window = 4;
        let report = diagnose(&ctx, &cfg);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.severity, ReportSeverity::Critical);
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.alerting_issues().count(), 1);
    }

    #[test]
    fn slow_scan_fires_on_mean_or_p95() {
        let cfg = DiagnosticsConfig::default();
        let mut ctx = quiet_context();
        ctx.scan = Some(ScanSnapshot {
            mean_ms: 20_000.0,
            p95_ms: 70_000.0,
        });
        let issues = evaluate(&ctx, &cfg);
        assert_eq!(issues[0].issue_type, IssueType::SlowScan);
        assert_eq!(issues[0].severity, Severity::Medium);

        ctx.scan = Some(ScanSnapshot {
            mean_ms: 95_000.0,
            p95_ms: 100_000.0,
        });
        assert_eq!(evaluate(&ctx, &cfg)[0].severity, Severity::High);

        ctx.scan = None;
        assert!(evaluate(&ctx, &cfg).is_empty());
    }

    #[test]
    fn network_issue_needs_minimum_volume() {
        let cfg = DiagnosticsConfig::default();
        let mut ctx = quiet_context();
        ctx.errors_in_window = 3;
        ctx.operations_in_window = 4;
        assert!(evaluate(&ctx, &cfg).is_empty());

        ctx.operations_in_window = 10;
        let issues = evaluate(&ctx, &cfg);
        assert_eq!(issues[0].issue_type, IssueType::NetworkIssue);
        assert!((issues[0].observed_value - 0.3).abs() < 1e-9);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn stale_session_after_timeout() {
        let cfg = DiagnosticsConfig::default();
        let mut ctx = quiet_context();
        ctx.last_activity = Some(ctx.now - chrono::Duration::seconds(1_801));
        let issues = evaluate(&ctx, &cfg);
        assert_eq!(issues[0].issue_type, IssueType::StaleSession);

        ctx.last_activity = None;
        assert!(evaluate(&ctx, &cfg).is_empty());
    }

    #[test]
    fn lock_contention_fires_over_threshold() {
        let cfg = DiagnosticsConfig::default();
        let mut ctx = quiet_context();
        ctx.lock_failures_in_window = 3;
        assert!(evaluate(&ctx, &cfg).is_empty());

        ctx.lock_failures_in_window = 4;
        let issues = evaluate(&ctx, &cfg);
        assert_eq!(issues[0].issue_type, IssueType::LockContention);
        assert_eq!(issues[0].severity, Severity::Medium);
    }

    #[test]
    fn disabled_rules_never_fire() {
        let mut cfg = DiagnosticsConfig::default();
        cfg.lock_contention.enabled = false;
        let mut ctx = quiet_context();
        ctx.lock_failures_in_window = 50;
        assert!(evaluate(&ctx, &cfg).is_empty());
    }

    #[test]
    fn each_issue_type_has_a_recommendation() {
        for t in [
            IssueType::SlowScan,
            IssueType::FrequentRegeneration,
            IssueType::NetworkIssue,
            IssueType::LockContention,
            IssueType::StaleSession,
        ] {
            let rec = recommendation_for(t);
            assert_eq!(rec.issue_type, t);
            assert!(!rec.action.is_empty());
            assert!(!rec.expected_improvement.is_empty());
        }
    }

    #[test]
    fn severity_escalation_saturates() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
        assert!(Severity::High.is_alerting());
        assert!(!Severity::Medium.is_alerting());
    }
}
