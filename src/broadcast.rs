//! Report delivery to subscribed recipients.
//!
//! A broadcast takes one dataset snapshot, then hands every recipient its
//! own task: build the report, send the blocks in order, each block under the
//! delivery timeout. One recipient failing or hanging never holds up the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::error::DeliveryError;
use crate::registry::Recipient;
use crate::report::{build_report, Report, ReportStatus};
use crate::state::AppState;
use crate::types::ReportPolicy;

/// Transport that carries one text block to one recipient.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, recipient: &Recipient, block: &str) -> Result<(), DeliveryError>;
}

/// Outcome of one broadcast run.
#[derive(Debug, Clone)]
pub struct BroadcastSummary {
    pub run_id: Uuid,
    pub delivered: Vec<Recipient>,
    pub failed: Vec<(Recipient, String)>,
}

/// Send blocks to one recipient in order. Stops at the first failed block.
pub async fn deliver_blocks(
    deliverer: &dyn Deliverer,
    recipient: &Recipient,
    blocks: &[String],
    timeout: Duration,
) -> Result<(), DeliveryError> {
    for block in blocks {
        match tokio::time::timeout(timeout, deliverer.deliver(recipient, block)).await {
            Ok(result) => result?,
            Err(_) => return Err(DeliveryError::Timeout(timeout.as_secs())),
        }
    }
    Ok(())
}

fn delivery_timeout(state: &AppState) -> Duration {
    Duration::from_secs(state.config.telegram.delivery_timeout_secs)
}

/// Build the report against the current cache contents.
pub async fn current_report(state: &AppState, as_of: NaiveDateTime) -> Report {
    let dataset = state.cache.get_dataset().await;
    build_report(&dataset, as_of, &state.config.report)
}

/// On-demand report for a single recipient, outside the schedule.
pub async fn report_to(
    state: &AppState,
    recipient: &Recipient,
    as_of: NaiveDateTime,
) -> Result<ReportStatus, DeliveryError> {
    let report = current_report(state, as_of).await;
    deliver_blocks(
        state.deliverer.as_ref(),
        recipient,
        &report.blocks,
        delivery_timeout(state),
    )
    .await?;
    Ok(report.status)
}

/// Deliver the report to every registered recipient.
pub async fn broadcast(state: &AppState, as_of: NaiveDateTime) -> BroadcastSummary {
    let run_id = Uuid::new_v4();
    let recipients = state.registry.list();
    let dataset = state.cache.get_dataset().await;

    log::info!(
        "Broadcast {}: {} recipient(s), dataset fetched at {:?}",
        run_id,
        recipients.len(),
        dataset.fetched_at
    );

    let summary = broadcast_snapshot(
        run_id,
        dataset,
        recipients,
        as_of,
        state.config.report.clone(),
        state.deliverer.clone(),
        delivery_timeout(state),
    )
    .await;

    log::info!(
        "Broadcast {} complete: {} delivered, {} failed",
        run_id,
        summary.delivered.len(),
        summary.failed.len()
    );
    summary
}

async fn broadcast_snapshot(
    run_id: Uuid,
    dataset: Arc<Dataset>,
    recipients: Vec<Recipient>,
    as_of: NaiveDateTime,
    policy: ReportPolicy,
    deliverer: Arc<dyn Deliverer>,
    timeout: Duration,
) -> BroadcastSummary {
    let handles: Vec<_> = recipients
        .into_iter()
        .map(|recipient| {
            let dataset = dataset.clone();
            let policy = policy.clone();
            let deliverer = deliverer.clone();
            let task_recipient = recipient.clone();
            let handle = tokio::spawn(async move {
                let report = build_report(&dataset, as_of, &policy);
                deliver_blocks(deliverer.as_ref(), &task_recipient, &report.blocks, timeout).await
            });
            (recipient, handle)
        })
        .collect();

    let mut summary = BroadcastSummary {
        run_id,
        delivered: Vec::new(),
        failed: Vec::new(),
    };

    for (recipient, handle) in handles {
        match handle.await {
            Ok(Ok(())) => summary.delivered.push(recipient),
            Ok(Err(e)) => {
                log::warn!("Broadcast {}: delivery to {} failed: {}", run_id, recipient, e);
                summary.failed.push((recipient, e.to_string()));
            }
            Err(e) => {
                log::error!("Broadcast {}: delivery task for {} aborted: {}", run_id, recipient, e);
                summary.failed.push((recipient, e.to_string()));
            }
        }
    }

    summary
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::cache::tests::{ScriptedSource, CSV_V1};
    use crate::types::Config;
    use parking_lot::Mutex;

    /// Records deliveries; fails or stalls for configured recipients.
    #[derive(Default)]
    pub(crate) struct RecordingDeliverer {
        pub sent: Mutex<Vec<(String, String)>>,
        failing: Vec<String>,
        stalling: Vec<String>,
    }

    impl RecordingDeliverer {
        pub(crate) fn failing(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn stalling(ids: &[&str]) -> Self {
            Self {
                stalling: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        pub(crate) fn recipients_sent(&self) -> Vec<String> {
            let mut ids: Vec<String> = self.sent.lock().iter().map(|(r, _)| r.clone()).collect();
            ids.sort();
            ids.dedup();
            ids
        }
    }

    #[async_trait]
    impl Deliverer for RecordingDeliverer {
        async fn deliver(&self, recipient: &Recipient, block: &str) -> Result<(), DeliveryError> {
            if self.stalling.iter().any(|id| id == recipient.as_str()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.iter().any(|id| id == recipient.as_str()) {
                return Err(DeliveryError::Network("chat not reachable".to_string()));
            }
            self.sent
                .lock()
                .push((recipient.as_str().to_string(), block.to_string()));
            Ok(())
        }
    }

    pub(crate) fn test_state(deliverer: Arc<RecordingDeliverer>, recipients: &[&str]) -> AppState {
        let mut config = Config::default();
        config.dataset_url = "https://example.com/sheet.csv".to_string();
        config.telegram.initial_recipients = recipients.iter().map(|s| s.to_string()).collect();
        config.telegram.delivery_timeout_secs = 1;
        let source = Arc::new(ScriptedSource::new(vec![Ok(CSV_V1)]));
        AppState::new(config, source, deliverer).unwrap()
    }

    fn as_of() -> NaiveDateTime {
        "2026-10-16T08:00:00".parse().unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failing_recipient() {
        let deliverer = Arc::new(RecordingDeliverer::failing(&["2"]));
        let state = test_state(deliverer.clone(), &["1", "2", "3"]);

        let summary = broadcast(&state, as_of()).await;

        let delivered: Vec<&str> = summary.delivered.iter().map(|r| r.as_str()).collect();
        assert_eq!(delivered, vec!["1", "3"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0.as_str(), "2");

        assert_eq!(deliverer.recipients_sent(), vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_broadcast_timeout_does_not_block_others() {
        let deliverer = Arc::new(RecordingDeliverer::stalling(&["1"]));
        let state = test_state(deliverer.clone(), &["1", "2"]);

        let summary = broadcast(&state, as_of()).await;

        assert_eq!(summary.delivered, vec![Recipient::new("2")]);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn test_blocks_delivered_in_order() {
        let deliverer = Arc::new(RecordingDeliverer::default());
        let blocks = vec!["uno".to_string(), "dos".to_string(), "tres".to_string()];

        deliver_blocks(
            deliverer.as_ref(),
            &Recipient::new("9"),
            &blocks,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let sent: Vec<String> = deliverer.sent.lock().iter().map(|(_, b)| b.clone()).collect();
        assert_eq!(sent, blocks);
    }

    #[tokio::test]
    async fn test_report_to_single_recipient() {
        let deliverer = Arc::new(RecordingDeliverer::default());
        let state = test_state(deliverer.clone(), &[]);

        let status = report_to(&state, &Recipient::new("42"), as_of()).await.unwrap();

        // CSV_V1 has no pour dates, so nothing can be pending
        assert_eq!(status, ReportStatus::NothingPending);
        assert_eq!(deliverer.recipients_sent(), vec!["42"]);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_recipients() {
        let deliverer = Arc::new(RecordingDeliverer::default());
        let state = test_state(deliverer.clone(), &[]);

        let summary = broadcast(&state, as_of()).await;
        assert!(summary.delivered.is_empty());
        assert!(summary.failed.is_empty());
    }
}
