//! Multi-channel notification dispatcher.
//!
//! [`NotificationDispatcher::send`] validates a request, throttles it against
//! the per-key cooldown, queues it for aggregation when asked to, and
//! otherwise delivers it on every requested channel with per-channel retry
//! and exponential backoff. Aggregation queues are drained by
//! [`flush_aggregations`](NotificationDispatcher::flush_aggregations), which
//! the monitor scheduler calls on a fixed interval.
//!
//! All mutable state (cooldowns, queues, history) lives behind one
//! `std::sync::Mutex` that is never held across an await.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use fleetwatch_core::channels::Channel;
use fleetwatch_core::clock::SharedClock;
use fleetwatch_core::error::CoreError;
use fleetwatch_core::notification::{
    backoff_delay, compute_statistics, overall_status, ChannelResult, DeliveryStatus,
    HistoryFilter, NotificationConfig, NotificationRecord, NotificationRequest,
    NotificationStatistics, SendOutcome,
};
use fleetwatch_core::types::Timestamp;
use fleetwatch_db::{Collection, SharedStore, StoredDocument};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::provider::{ChannelProvider, OutboundMessage};
use crate::templates::{TemplateRegistry, TEMPLATE_AGGREGATED_DIGEST};

/// Data key that overrides the configured recipient for every channel.
pub const RECIPIENT_OVERRIDE_KEY: &str = "recipient";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AggregationQueue {
    items: Vec<NotificationRequest>,
    first_at: Timestamp,
    last_at: Timestamp,
}

#[derive(Debug, Default)]
struct DispatchState {
    last_sent: HashMap<String, Timestamp>,
    queues: BTreeMap<String, AggregationQueue>,
    /// Oldest first; capped at `history_limit`.
    history: VecDeque<NotificationRecord>,
}

/// Why a delivery pass produced no record.
enum DeliveryAbort {
    ShutDown,
}

// ---------------------------------------------------------------------------
// NotificationDispatcher
// ---------------------------------------------------------------------------

pub struct NotificationDispatcher {
    config: NotificationConfig,
    providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
    templates: TemplateRegistry,
    store: Option<SharedStore>,
    clock: SharedClock,
    state: Mutex<DispatchState>,
    cancel: CancellationToken,
}

impl NotificationDispatcher {
    pub fn new(config: NotificationConfig, clock: SharedClock) -> Self {
        Self {
            config,
            providers: HashMap::new(),
            templates: TemplateRegistry::default(),
            store: None,
            clock,
            state: Mutex::new(DispatchState::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a provider for the channel it reports. Replaces any previous
    /// provider for that channel.
    pub fn with_provider(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.providers.insert(provider.channel(), provider);
        self
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    pub fn registered_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.providers.keys().copied().collect();
        channels.sort();
        channels
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // -- send --

    /// Validate, throttle, aggregate or deliver one request.
    pub async fn send(&self, request: NotificationRequest) -> Result<SendOutcome, CoreError> {
        request.validate()?;
        if self.cancel.is_cancelled() {
            return Err(CoreError::Internal("notification dispatcher is shut down".into()));
        }

        let key = request.dedup_key();
        let now = self.clock.now();
        let previous = {
            let mut state = self.lock();

            if let Some(last) = state.last_sent.get(&key) {
                let elapsed = now - *last;
                if elapsed < self.config.cooldown() {
                    let retry_after_secs = (self.config.cooldown() - elapsed).num_seconds().max(0);
                    tracing::debug!(key = %key, retry_after_secs, "Notification throttled");
                    return Ok(SendOutcome::Throttled {
                        key,
                        retry_after_secs,
                    });
                }
            }

            if request.aggregation_key.is_some() || self.config.aggregates_globally() {
                let agg_key = request.aggregation_key.clone().unwrap_or_else(|| key.clone());
                let queue = state
                    .queues
                    .entry(agg_key.clone())
                    .or_insert_with(|| AggregationQueue {
                        items: Vec::new(),
                        first_at: now,
                        last_at: now,
                    });
                queue.items.push(request);
                queue.last_at = now;
                let queued = queue.items.len();
                tracing::debug!(aggregation_key = %agg_key, queued, "Notification queued for aggregation");
                return Ok(SendOutcome::Aggregated {
                    key: agg_key,
                    queued,
                });
            }

            // Reserve the key before delivering so a concurrent send with the
            // same key is throttled instead of delivering twice.
            state.last_sent.insert(key.clone(), now)
        };

        let record = match self.deliver(&request, false, 1, now).await {
            Ok(record) => record,
            Err(DeliveryAbort::ShutDown) => {
                self.release_reservation(&key, now, previous);
                return Err(CoreError::Internal(
                    "notification dispatcher shut down during delivery".into(),
                ));
            }
        };

        if !attempted(&record) {
            self.release_reservation(&key, now, previous);
        }
        Ok(SendOutcome::Delivered(record))
    }

    /// Undo a cooldown reservation made at `reserved_at`, unless a later
    /// delivery has replaced it.
    fn release_reservation(&self, key: &str, reserved_at: Timestamp, previous: Option<Timestamp>) {
        let mut state = self.lock();
        if state.last_sent.get(key) != Some(&reserved_at) {
            return;
        }
        match previous {
            Some(at) => state.last_sent.insert(key.to_string(), at),
            None => state.last_sent.remove(key),
        };
    }

    // -- aggregation --

    /// Deliver every non-empty aggregation queue as one combined record,
    /// bypassing cooldown. A delivered digest starts the cooldown of each
    /// dedup key it carried. Returns the number of records delivered.
    pub async fn flush_aggregations(&self) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        let queues = std::mem::take(&mut self.lock().queues);
        let mut flushed = 0;

        for (agg_key, queue) in queues {
            if queue.items.is_empty() {
                continue;
            }
            let count = queue.items.len();
            let combined = combine(&agg_key, &queue);
            let now = self.clock.now();
            match self.deliver(&combined, true, count, now).await {
                Ok(record) => {
                    if attempted(&record) {
                        // A digest is a real delivery, so it starts the
                        // cooldown of every key it carried.
                        let mut state = self.lock();
                        for item in &queue.items {
                            state.last_sent.insert(item.dedup_key(), now);
                        }
                    }
                    tracing::info!(
                        aggregation_key = %agg_key,
                        count,
                        status = ?record.overall_status,
                        "Aggregated notifications flushed"
                    );
                    flushed += 1;
                }
                Err(DeliveryAbort::ShutDown) => {
                    tracing::warn!(aggregation_key = %agg_key, count, "Flush abandoned by shutdown");
                    break;
                }
            }
        }
        flushed
    }

    /// Requests currently waiting in aggregation queues, per key.
    pub fn pending_aggregations(&self) -> BTreeMap<String, usize> {
        self.lock()
            .queues
            .iter()
            .map(|(k, q)| (k.clone(), q.items.len()))
            .collect()
    }

    // -- queries --

    /// Matching records, newest first, at most `filter.effective_limit()`.
    pub fn history(&self, filter: &HistoryFilter) -> Vec<NotificationRecord> {
        self.lock()
            .history
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.effective_limit())
            .cloned()
            .collect()
    }

    /// Statistics over matching records. Without an explicit limit every
    /// retained record is counted.
    pub fn statistics(&self, filter: &HistoryFilter) -> NotificationStatistics {
        let state = self.lock();
        let matching = state.history.iter().rev().filter(|r| filter.matches(r));
        match filter.limit {
            Some(limit) => compute_statistics(matching.take(limit)),
            None => compute_statistics(matching),
        }
    }

    // -- lifecycle --

    /// Cancel pending backoff waits and drop queued aggregations. Deliveries
    /// still in flight finish without being recorded.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let dropped: usize = {
            let mut state = self.lock();
            let dropped = state.queues.values().map(|q| q.items.len()).sum();
            state.queues.clear();
            dropped
        };
        tracing::info!(dropped, "Notification dispatcher shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -- delivery --

    async fn deliver(
        &self,
        request: &NotificationRequest,
        aggregated: bool,
        count: usize,
        now: Timestamp,
    ) -> Result<NotificationRecord, DeliveryAbort> {
        let rendered = self
            .templates
            .render(&request.template, &request.notification_type, &request.data);
        let message = OutboundMessage {
            notification_type: request.notification_type.clone(),
            account_key: request.account_key.clone(),
            priority: request.priority,
            subject: rendered.subject,
            body: rendered.body,
            data: request.data.clone(),
            timestamp: now,
        };

        let mut seen = HashSet::new();
        let channels: Vec<Channel> = request
            .channels
            .iter()
            .copied()
            .filter(|c| seen.insert(*c))
            .collect();
        let results = join_all(channels.iter().map(|&channel| {
            let recipient = self.resolve_recipient(channel, &request.data);
            let message = &message;
            async move { self.deliver_channel(channel, message, &recipient).await }
        }))
        .await;

        if self.cancel.is_cancelled() {
            tracing::debug!(
                notification_type = %request.notification_type,
                "Discarding delivery result after shutdown"
            );
            return Err(DeliveryAbort::ShutDown);
        }

        let record = NotificationRecord {
            id: Uuid::now_v7(),
            notification_type: request.notification_type.clone(),
            account_key: request.account_key.clone(),
            priority: request.priority,
            overall_status: overall_status(&results),
            channel_results: results,
            sent_at: now,
            aggregated,
            count,
            data: request.data.clone(),
        };

        {
            let mut state = self.lock();
            state.history.push_back(record.clone());
            while state.history.len() > self.config.history_limit {
                state.history.pop_front();
            }
        }
        self.persist(&record).await;
        Ok(record)
    }

    /// Attempt one channel up to `retry_count` times.
    async fn deliver_channel(
        &self,
        channel: Channel,
        message: &OutboundMessage,
        recipient: &str,
    ) -> ChannelResult {
        let Some(provider) = self.providers.get(&channel) else {
            tracing::warn!(channel = %channel, "No provider registered for channel");
            return ChannelResult {
                channel,
                status: DeliveryStatus::Failed,
                delivery_time_ms: 0,
                attempts: 0,
                error: Some(format!("no provider registered for channel {channel}")),
            };
        };

        let started = tokio::time::Instant::now();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.config.retry_count {
            attempts += 1;
            match provider.send(message, recipient).await {
                Ok(_) => {
                    return ChannelResult {
                        channel,
                        status: DeliveryStatus::Sent,
                        delivery_time_ms: started.elapsed().as_millis() as u64,
                        attempts,
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %channel,
                        attempt = attempts,
                        account_key = %message.account_key,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempts < self.config.retry_count {
                let delay = backoff_delay(self.config.base_delay(), attempts);
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tracing::error!(channel = %channel, attempts, "Delivery failed after all retries");
        ChannelResult {
            channel,
            status: DeliveryStatus::Failed,
            delivery_time_ms: started.elapsed().as_millis() as u64,
            attempts,
            error: last_error,
        }
    }

    fn resolve_recipient(&self, channel: Channel, data: &serde_json::Value) -> String {
        data.get(RECIPIENT_OVERRIDE_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.config.recipients.get(&channel).cloned())
            .unwrap_or_default()
    }

    async fn persist(&self, record: &NotificationRecord) {
        let Some(store) = &self.store else {
            return;
        };
        let doc = match StoredDocument::from_serializable(
            Collection::Notifications,
            &record.account_key,
            record.sent_at,
            record,
        ) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode notification record");
                return;
            }
        };
        if let Err(e) = store.insert(doc).await {
            tracing::warn!(
                error = %e,
                notification_type = %record.notification_type,
                "Failed to persist notification record"
            );
        }
    }
}

/// Whether any channel made at least one real delivery attempt.
fn attempted(record: &NotificationRecord) -> bool {
    record.channel_results.iter().any(|r| r.attempts > 0)
}

/// Fold a queue into one request carrying every item in `data.items`.
fn combine(agg_key: &str, queue: &AggregationQueue) -> NotificationRequest {
    let first = &queue.items[0];
    let same_account = queue.items.iter().all(|r| r.account_key == first.account_key);
    let account_key = if same_account {
        first.account_key.clone()
    } else {
        agg_key.to_string()
    };

    let mut channels: Vec<Channel> = queue.items.iter().flat_map(|r| r.channels.iter().copied()).collect();
    channels.sort();
    channels.dedup();

    let priority = queue
        .items
        .iter()
        .map(|r| r.priority)
        .max()
        .unwrap_or(first.priority);

    let items: Vec<serde_json::Value> = queue
        .items
        .iter()
        .map(|r| {
            serde_json::json!({
                "type": r.notification_type,
                "account_key": r.account_key,
                "data": r.data,
            })
        })
        .collect();

    let mut data = serde_json::json!({
        "aggregation_key": agg_key,
        "count": queue.items.len(),
        "first_at": queue.first_at,
        "last_at": queue.last_at,
        "items": items,
    });
    if let Some(recipient) = first.data.get(RECIPIENT_OVERRIDE_KEY) {
        data[RECIPIENT_OVERRIDE_KEY] = recipient.clone();
    }

    NotificationRequest::new(first.notification_type.clone(), account_key)
        .with_channels(channels)
        .with_priority(priority)
        .with_template(TEMPLATE_AGGREGATED_DIGEST)
        .with_data(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use fleetwatch_core::clock::ManualClock;
    use fleetwatch_core::notification::{OverallStatus, Priority};
    use fleetwatch_db::{DocumentFilter, DocumentStore, MemoryStore};

    use super::*;
    use crate::provider::{DeliveryError, DeliveryReceipt};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyProvider {
        channel: Channel,
        failures: u32,
        calls: AtomicU32,
        recipients: Mutex<Vec<String>>,
    }

    impl FlakyProvider {
        fn new(channel: Channel, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                channel,
                failures,
                calls: AtomicU32::new(0),
                recipients: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelProvider for FlakyProvider {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            _message: &OutboundMessage,
            recipient: &str,
        ) -> Result<DeliveryReceipt, DeliveryError> {
            self.recipients.lock().unwrap().push(recipient.to_string());
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            // Suspend once so concurrent sends interleave.
            tokio::task::yield_now().await;
            if n <= self.failures {
                Err(DeliveryError::Rejected(format!("failure {n}")))
            } else {
                Ok(DeliveryReceipt::default())
            }
        }
    }

    fn dispatcher(config: NotificationConfig) -> (NotificationDispatcher, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        (NotificationDispatcher::new(config, clock.clone()), clock)
    }

    fn request() -> NotificationRequest {
        NotificationRequest::new("X", "A").with_channels([Channel::InApp])
    }

    // -- validation --

    #[tokio::test]
    async fn invalid_requests_are_rejected_without_side_effects() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        for bad in [
            NotificationRequest::new("", "A"),
            NotificationRequest::new("X", ""),
            NotificationRequest::new("X", "A").with_channels(Vec::new()),
        ] {
            assert_matches!(d.send(bad).await, Err(CoreError::Validation(_)));
        }
        assert_eq!(provider.calls(), 0);
        assert!(d.history(&HistoryFilter::default()).is_empty());
    }

    // -- cooldown --

    #[tokio::test]
    async fn second_send_within_cooldown_is_throttled() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, clock) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        let first = d.send(request()).await.unwrap();
        assert_eq!(first.status(), OverallStatus::Success);

        clock.advance(chrono::Duration::milliseconds(500));
        let second = d.send(request()).await.unwrap();
        assert_eq!(second.status(), OverallStatus::Throttled);
        assert_matches!(second, SendOutcome::Throttled { retry_after_secs, .. } if retry_after_secs > 3_500);

        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_sends_deliver_once() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        let (a, b) = tokio::join!(d.send(request()), d.send(request()));
        let mut statuses = [a.unwrap().status(), b.unwrap().status()];
        statuses.sort_by_key(|s| format!("{s:?}"));
        assert_eq!(statuses, [OverallStatus::Success, OverallStatus::Throttled]);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn cooldown_expires() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, clock) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        d.send(request()).await.unwrap();
        clock.advance(chrono::Duration::seconds(3_600));
        let again = d.send(request()).await.unwrap();
        assert_eq!(again.status(), OverallStatus::Success);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn cooldown_is_per_dedup_key() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        d.send(request()).await.unwrap();
        let other_account = NotificationRequest::new("X", "B").with_channels([Channel::InApp]);
        assert_eq!(d.send(other_account).await.unwrap().status(), OverallStatus::Success);
    }

    #[tokio::test]
    async fn unregistered_channel_does_not_start_cooldown() {
        let (d, _) = dispatcher(NotificationConfig::default());
        let outcome = d.send(request()).await.unwrap();
        let record = outcome.record().unwrap();
        assert_eq!(record.overall_status, OverallStatus::PartialFailure);
        assert_eq!(record.channel_results[0].attempts, 0);
        assert_eq!(record.channel_results[0].status, DeliveryStatus::Failed);

        // Nothing was really attempted, so the next send is not throttled.
        assert_ne!(d.send(request()).await.unwrap().status(), OverallStatus::Throttled);
    }

    // -- retry --

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let provider = FlakyProvider::new(Channel::Chat, 2);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        let started = tokio::time::Instant::now();
        let outcome = d
            .send(NotificationRequest::new("X", "A").with_channels([Channel::Chat]))
            .await
            .unwrap();

        let result = &outcome.record().unwrap().channel_results[0];
        assert_eq!(result.status, DeliveryStatus::Sent);
        assert_eq!(result.attempts, 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(result.delivery_time_ms, 3_000);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_failure() {
        let provider = FlakyProvider::new(Channel::Chat, 3);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        let outcome = d
            .send(NotificationRequest::new("X", "A").with_channels([Channel::Chat]))
            .await
            .unwrap();
        let result = &outcome.record().unwrap().channel_results[0];
        assert_eq!(result.status, DeliveryStatus::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.error.as_deref(), Some("Delivery rejected: failure 3"));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_channel_is_partial_failure() {
        let good = FlakyProvider::new(Channel::InApp, 0);
        let bad = FlakyProvider::new(Channel::Sms, 10);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(good).with_provider(bad);

        let outcome = d
            .send(NotificationRequest::new("X", "A").with_channels([Channel::InApp, Channel::Sms]))
            .await
            .unwrap();
        assert_eq!(outcome.status(), OverallStatus::PartialFailure);
    }

    // -- aggregation --

    #[tokio::test]
    async fn aggregated_requests_flush_as_one_record() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, clock) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider.clone());

        for i in 0..5 {
            let outcome = d
                .send(
                    request()
                        .with_aggregation_key("burst")
                        .with_data(serde_json::json!({ "n": i })),
                )
                .await
                .unwrap();
            assert_matches!(outcome, SendOutcome::Aggregated { ref key, queued } if key == "burst" && queued == i + 1);
            clock.advance(chrono::Duration::seconds(10));
        }
        assert_eq!(provider.calls(), 0);

        assert_eq!(d.flush_aggregations().await, 1);
        assert_eq!(provider.calls(), 1);

        let history = d.history(&HistoryFilter::default());
        assert_eq!(history.len(), 1);
        assert!(history[0].aggregated);
        assert_eq!(history[0].count, 5);
        assert_eq!(history[0].data["items"].as_array().unwrap().len(), 5);

        // Queue cleared: flushing again delivers nothing.
        assert_eq!(d.flush_aggregations().await, 0);
    }

    #[tokio::test]
    async fn global_window_aggregates_by_dedup_key() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let config = NotificationConfig {
            aggregation_window_secs: 60,
            ..NotificationConfig::default()
        };
        let (d, _) = dispatcher(config);
        let d = d.with_provider(provider.clone());

        d.send(request()).await.unwrap();
        let outcome = d.send(request()).await.unwrap();
        assert_matches!(outcome, SendOutcome::Aggregated { ref key, queued: 2 } if key == "X:A");
        assert_eq!(d.pending_aggregations().get("X:A"), Some(&2));
    }

    #[tokio::test]
    async fn flushed_digest_starts_cooldown() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let config = NotificationConfig {
            aggregation_window_secs: 60,
            ..NotificationConfig::default()
        };
        let (d, clock) = dispatcher(config);
        let d = d.with_provider(provider.clone());

        d.send(request()).await.unwrap();
        assert_eq!(d.flush_aggregations().await, 1);
        assert_eq!(provider.calls(), 1);

        clock.advance(chrono::Duration::seconds(30));
        let again = d.send(request()).await.unwrap();
        assert_eq!(again.status(), OverallStatus::Throttled);
        assert_eq!(d.flush_aggregations().await, 0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn failed_flush_does_not_start_cooldown() {
        let config = NotificationConfig {
            aggregation_window_secs: 60,
            ..NotificationConfig::default()
        };
        // No provider: the digest makes no real attempt.
        let (d, _) = dispatcher(config);

        d.send(request()).await.unwrap();
        assert_eq!(d.flush_aggregations().await, 1);
        assert_matches!(d.send(request()).await.unwrap(), SendOutcome::Aggregated { .. });
    }

    // -- recipients --

    #[tokio::test]
    async fn recipient_override_beats_configured_recipient() {
        let provider = FlakyProvider::new(Channel::Email, 0);
        let mut config = NotificationConfig::default();
        config.recipients.insert(Channel::Email, "ops@example.com".into());
        let (d, _) = dispatcher(config);
        let d = d.with_provider(provider.clone());

        d.send(NotificationRequest::new("X", "A").with_channels([Channel::Email]))
            .await
            .unwrap();
        d.send(
            NotificationRequest::new("Y", "A")
                .with_channels([Channel::Email])
                .with_data(serde_json::json!({ "recipient": "owner@example.com" })),
        )
        .await
        .unwrap();

        let seen = provider.recipients.lock().unwrap().clone();
        assert_eq!(seen, vec!["ops@example.com", "owner@example.com"]);
    }

    // -- history & statistics --

    #[tokio::test]
    async fn history_is_filtered_newest_first() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, clock) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider);

        for (kind, account) in [("X", "A"), ("Y", "A"), ("X", "B")] {
            d.send(NotificationRequest::new(kind, account).with_channels([Channel::InApp]))
                .await
                .unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }

        let all = d.history(&HistoryFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].account_key, "B");

        let only_x = d.history(&HistoryFilter {
            notification_type: Some("X".into()),
            ..HistoryFilter::default()
        });
        assert_eq!(only_x.len(), 2);

        let limited = d.history(&HistoryFilter {
            limit: Some(1),
            ..HistoryFilter::default()
        });
        assert_eq!(limited.len(), 1);

        let stats = d.statistics(&HistoryFilter::default());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 3);
        assert_eq!(stats.channels[&Channel::InApp].sent, 3);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let config = NotificationConfig {
            history_limit: 2,
            cooldown_secs: 0,
            ..NotificationConfig::default()
        };
        let (d, _) = dispatcher(config);
        let d = d.with_provider(provider);

        for _ in 0..4 {
            d.send(request()).await.unwrap();
        }
        assert_eq!(d.history(&HistoryFilter::default()).len(), 2);
    }

    // -- persistence --

    #[tokio::test]
    async fn records_are_persisted_best_effort() {
        let store = Arc::new(MemoryStore::new());
        let provider = FlakyProvider::new(Channel::InApp, 0);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = d.with_provider(provider).with_store(store.clone());

        d.send(request()).await.unwrap();
        let docs = store
            .find(Collection::Notifications, &DocumentFilter::for_account("A"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].body["type"], "X");

        store.set_available(false);
        let outcome = d
            .send(NotificationRequest::new("Z", "A").with_channels([Channel::InApp]))
            .await
            .unwrap();
        assert_eq!(outcome.status(), OverallStatus::Success);
    }

    // -- shutdown --

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_backoff_and_discards_result() {
        let provider = FlakyProvider::new(Channel::Chat, 10);
        let (d, _) = dispatcher(NotificationConfig::default());
        let d = Arc::new(d.with_provider(provider.clone()));

        let sender = Arc::clone(&d);
        let handle = tokio::spawn(async move {
            sender
                .send(
                    NotificationRequest::new("X", "A")
                        .with_channels([Channel::Chat])
                        .with_priority(Priority::High),
                )
                .await
        });

        // Let the first attempt fail and the backoff sleep begin.
        tokio::time::sleep(Duration::from_millis(10)).await;
        d.shutdown();

        let result = handle.await.unwrap();
        assert_matches!(result, Err(CoreError::Internal(_)));
        assert_eq!(provider.calls(), 1);
        assert!(d.history(&HistoryFilter::default()).is_empty());
        assert!(d.is_shut_down());
        assert_matches!(d.send(request()).await, Err(CoreError::Internal(_)));
    }
}
