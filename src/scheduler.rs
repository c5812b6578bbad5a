//! Scheduler for the daily report broadcast
//!
//! Manages the report schedule with support for:
//! - Cron expression parsing
//! - Timezone-aware scheduling
//! - Sleep/wake detection via time-jump polling
//! - Missed run handling (runs if within grace period)

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::types::{ExecutionTrigger, ScheduleEntry};

/// Grace period for missed runs (2 hours)
const MISSED_RUN_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for scheduler loop (1 minute)
const POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No upcoming scheduled time")]
    NoUpcoming,
}

/// Message sent to trigger a report broadcast
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub trigger: ExecutionTrigger,
    pub scheduled_for: DateTime<Utc>,
}

/// Scheduler that decides when the daily broadcast is due
pub struct Scheduler {
    state: Arc<AppState>,
    sender: mpsc::Sender<SchedulerMessage>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { state, sender }
    }

    /// Start the scheduler loop
    ///
    /// This runs indefinitely, checking once a minute whether the report is due.
    pub async fn run(&self) {
        let entry = self.state.config.schedule.clone();
        if !entry.enabled {
            log::info!("Daily report schedule disabled");
            return;
        }

        match get_next_run_time(&entry) {
            Ok(next) => log::info!(
                "Daily report scheduled ('{}' {}), next run at {}",
                entry.cron,
                entry.timezone,
                next
            ),
            Err(e) => {
                log::error!("Daily report schedule unusable: {}", e);
                return;
            }
        }

        let mut last_check = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;

            let now = Utc::now();

            // Detect sleep: time jumped more than 5 minutes
            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Detected system wake (time jumped {} seconds), checking for missed report",
                    time_jump
                );
                if let Ok(Some(missed)) =
                    find_missed_run(&entry, self.state.get_last_scheduled_run(), now)
                {
                    log::info!("Found missed report run scheduled for {}, running now", missed);
                    self.trigger(ExecutionTrigger::Missed, missed).await;
                }
            }

            match due_slot(&entry, self.state.get_last_scheduled_run(), now) {
                Ok(Some(slot)) => self.trigger(ExecutionTrigger::Scheduled, slot).await,
                Ok(None) => {}
                Err(e) => log::warn!("Schedule check failed: {}", e),
            }

            last_check = now;
        }
    }

    async fn trigger(&self, trigger: ExecutionTrigger, scheduled_for: DateTime<Utc>) {
        self.state.set_last_scheduled_run(scheduled_for);
        if self
            .sender
            .send(SchedulerMessage {
                trigger,
                scheduled_for,
            })
            .await
            .is_err()
        {
            log::error!("Failed to send scheduler message for {:?} run", trigger);
        }
    }
}

/// Consume scheduler messages and run one broadcast per message.
pub async fn run_dispatcher(state: Arc<AppState>, mut receiver: mpsc::Receiver<SchedulerMessage>) {
    while let Some(message) = receiver.recv().await {
        if state.registry.is_empty() {
            log::info!(
                "Skipping {:?} report broadcast (slot {}): no recipients subscribed",
                message.trigger,
                message.scheduled_for
            );
            continue;
        }
        log::info!(
            "Running {:?} report broadcast (slot {})",
            message.trigger,
            message.scheduled_for
        );
        let as_of = state.local_now();
        crate::broadcast::broadcast(&state, as_of).await;
    }
    log::info!("Scheduler channel closed, dispatcher stopping");
}

fn parse_timezone(entry: &ScheduleEntry) -> Result<Tz, ScheduleError> {
    entry
        .timezone
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(entry.timezone.clone()))
}

/// Scheduled slot within two minutes of `now` that has not run yet
pub fn due_slot(
    entry: &ScheduleEntry,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(entry)?;

    let now_local = now.with_timezone(&tz);

    // Find the first scheduled time after (now - 2 minutes)
    let mut scheduled_times = schedule.after(&(now_local - chrono::Duration::minutes(2)));

    if let Some(next_time) = scheduled_times.next() {
        let next_utc = next_time.with_timezone(&Utc);
        let diff = (now - next_utc).num_seconds().abs();

        if diff < 120 {
            if let Some(last) = last_run {
                if (last - next_utc).num_seconds().abs() < 60 {
                    return Ok(None); // Already ran
                }
            }
            return Ok(Some(next_utc));
        }
    }

    Ok(None)
}

/// Find a slot missed within the grace period
pub fn find_missed_run(
    entry: &ScheduleEntry,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(entry)?;

    let now_local = now.with_timezone(&tz);
    let grace_start = now_local - chrono::Duration::seconds(MISSED_RUN_GRACE_PERIOD_SECS);

    for scheduled in schedule.after(&grace_start) {
        let scheduled_utc = scheduled.with_timezone(&Utc);

        if scheduled_utc > now {
            break;
        }

        if let Some(last) = last_run {
            if last >= scheduled_utc {
                continue; // Already ran
            }
        }

        return Ok(Some(scheduled_utc));
    }

    Ok(None)
}

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, ScheduleError> {
    // The cron crate expects 6 fields (with seconds), but we use 5-field format
    let full_expr = format!("0 {}", expr);

    full_expr
        .parse::<Schedule>()
        .map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

/// Get the next scheduled report time
pub fn get_next_run_time(entry: &ScheduleEntry) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(entry)?;

    let next = schedule.upcoming(tz).next().ok_or(ScheduleError::NoUpcoming)?;

    Ok(next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ScheduleEntry {
        ScheduleEntry {
            enabled: true,
            cron: "0 8 * * *".to_string(),
            timezone: "America/Mexico_City".to_string(),
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_cron_daily_8am() {
        assert!(parse_cron("0 8 * * *").is_ok());
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(matches!(
            parse_cron("not a cron"),
            Err(ScheduleError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_due_slot_respects_timezone() {
        // 08:00 in Mexico City is 14:00 UTC (no DST since 2022)
        let slot = due_slot(&entry(), None, utc("2026-10-16T14:00:30Z")).unwrap();
        assert_eq!(slot, Some(utc("2026-10-16T14:00:00Z")));

        assert_eq!(due_slot(&entry(), None, utc("2026-10-16T08:00:00Z")).unwrap(), None);
    }

    #[test]
    fn test_due_slot_fires_once() {
        let now = utc("2026-10-16T14:01:00Z");
        let slot = due_slot(&entry(), None, now).unwrap().unwrap();
        assert_eq!(due_slot(&entry(), Some(slot), now).unwrap(), None);
    }

    #[test]
    fn test_find_missed_run_within_grace() {
        let now = utc("2026-10-16T15:30:00Z");
        let missed = find_missed_run(&entry(), Some(utc("2026-10-15T14:00:00Z")), now).unwrap();
        assert_eq!(missed, Some(utc("2026-10-16T14:00:00Z")));

        let already = find_missed_run(&entry(), Some(utc("2026-10-16T14:00:00Z")), now).unwrap();
        assert_eq!(already, None);
    }

    #[test]
    fn test_find_missed_run_outside_grace() {
        let now = utc("2026-10-16T17:00:00Z");
        assert_eq!(find_missed_run(&entry(), None, now).unwrap(), None);
    }

    #[test]
    fn test_invalid_timezone() {
        let mut bad = entry();
        bad.timezone = "Nowhere/Special".to_string();
        assert!(matches!(
            get_next_run_time(&bad),
            Err(ScheduleError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_get_next_run_time() {
        assert!(get_next_run_time(&entry()).is_ok());
    }

    #[tokio::test]
    async fn test_dispatcher_broadcasts_only_with_recipients() {
        use crate::broadcast::tests::RecordingDeliverer;
        use crate::dataset::cache::tests::{ScriptedSource, CSV_V1};
        use crate::types::Config;
        use std::sync::atomic::Ordering;

        for (recipients, expected_fetches, expected_sent) in
            [(vec![], 0, vec![]), (vec!["1".to_string()], 1, vec!["1".to_string()])]
        {
            let mut config = Config::default();
            config.dataset_url = "https://example.com/sheet.csv".to_string();
            config.telegram.initial_recipients = recipients;
            let source = Arc::new(ScriptedSource::new(vec![Ok(CSV_V1)]));
            let deliverer = Arc::new(RecordingDeliverer::default());
            let state = Arc::new(AppState::new(config, source.clone(), deliverer.clone()).unwrap());

            let (tx, rx) = mpsc::channel(1);
            tx.send(SchedulerMessage {
                trigger: ExecutionTrigger::Scheduled,
                scheduled_for: utc("2026-10-16T14:00:00Z"),
            })
            .await
            .unwrap();
            drop(tx);
            run_dispatcher(state, rx).await;

            assert_eq!(source.calls.load(Ordering::SeqCst), expected_fetches);
            assert_eq!(deliverer.recipients_sent(), expected_sent);
        }
    }
}
