//! One notification cycle: detect, throttle, send, report.
//!
//! Waitlist and history mutations are committed before any message leaves,
//! so a crash mid-send never re-notifies users who were already removed.
//! Email and SMS batches run concurrently, each with bounded parallelism;
//! a failed send is counted and never retried within the cycle.

use crate::db::{LiveStatus, Store, SystemLogKind};
use crate::error::MonitorError;
use crate::monitor::Monitor;
use crate::notify::{
    render_email, render_sms, EmailMessage, Mailer, MessageLinks, SmsMessage, Texter, Throttle,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Counts for a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub emails_attempted: usize,
    pub emails_sent: usize,
    pub texts_attempted: usize,
    pub texts_sent: usize,
    /// "COS126 L01" for every section that produced messages
    pub sections: Vec<String>,
    pub courses_examined: usize,
    pub skipped_recipients: usize,
    pub failed_batches: usize,
    pub duration: Duration,
}

impl CycleSummary {
    pub fn total_sent(&self) -> usize {
        self.emails_sent + self.texts_sent
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// Maintenance mode was on; nothing was fetched or sent
    Killed,
    /// Another cycle was already running
    Skipped,
}

pub struct CycleRunner {
    store: Arc<dyn Store>,
    monitor: Monitor,
    throttle: Throttle,
    mailer: Arc<dyn Mailer>,
    texter: Arc<dyn Texter>,
    links: MessageLinks,
    workers: usize,
    in_flight: Mutex<()>,
}

impl CycleRunner {
    pub fn new(
        store: Arc<dyn Store>,
        monitor: Monitor,
        throttle: Throttle,
        mailer: Arc<dyn Mailer>,
        texter: Arc<dyn Texter>,
        links: MessageLinks,
        workers: usize,
    ) -> Self {
        Self {
            store,
            monitor,
            throttle,
            mailer,
            texter,
            links,
            workers: workers.max(1),
            in_flight: Mutex::new(()),
        }
    }

    /// Runs a full cycle. Safe to call at any time: a call made while a
    /// cycle is in flight returns [`CycleOutcome::Skipped`].
    pub async fn run_cycle(&self) -> Result<CycleOutcome, MonitorError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            info!("Cycle already in flight, skipping trigger");
            return Ok(CycleOutcome::Skipped);
        };

        let start = Instant::now();
        self.store
            .add_system_log(SystemLogKind::Cron, "notifications script executing", None)?;

        if self.store.maintenance_mode()? {
            warn!("Maintenance mode on, cycle killed");
            self.store.add_system_log(
                SystemLogKind::Cron,
                "app in maintenance mode: notifications script killed",
                None,
            )?;
            return Ok(CycleOutcome::Killed);
        }

        let ctx = self.monitor.begin_cycle();
        let enrollments = match ctx.changed_enrollments().await {
            Ok(enrollments) => enrollments,
            Err(e) => {
                error!(error = %e, "Cycle failed before sending");
                let message = format!("notifications script failed: {e}");
                if let Err(log_err) = self.store.add_system_log(SystemLogKind::Cron, &message, None)
                {
                    warn!(error = %log_err, "Failed to record cycle failure");
                }
                return Err(e);
            }
        };

        self.store.set_live_status(&LiveStatus::Active {
            description: "Sending notifs (0 sent so far)...".to_string(),
        })?;

        let mut summary = CycleSummary {
            courses_examined: enrollments.courses_examined,
            failed_batches: enrollments.batch_errors.len(),
            ..CycleSummary::default()
        };
        let mut emails: Vec<EmailMessage> = Vec::new();
        let mut texts: Vec<SmsMessage> = Vec::new();

        for (classid, &n_new_slots) in &enrollments.new_slots {
            let now = Utc::now();
            if n_new_slots == 0 {
                if let Err(e) = self.throttle.record_no_openings(classid, now) {
                    warn!(classid = %classid, error = %e, "Failed to reset notification history");
                }
                continue;
            }

            let mut plan = match self.throttle.plan_section(classid, n_new_slots, now) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(classid = %classid, error = %e, "Skipping section");
                    continue;
                }
            };
            if let Err(e) = self.throttle.commit(&mut plan, now) {
                warn!(classid = %classid, error = %e, "Failed to commit section, not sending");
                continue;
            }
            summary.skipped_recipients += plan.skipped;
            if plan.recipients.is_empty() {
                continue;
            }

            info!(
                classid = %classid,
                n_new_slots,
                recipients = plan.recipients.len(),
                "Sending notifs for section"
            );
            for recipient in &plan.recipients {
                let user = &recipient.user;
                emails.push(render_email(
                    &user.email,
                    &user.netid,
                    &plan.info,
                    n_new_slots,
                    recipient.unsubscribed,
                    &self.links,
                ));
                texts.extend(render_sms(
                    user.phone.as_deref(),
                    &plan.info,
                    n_new_slots,
                    recipient.unsubscribed,
                    &self.links,
                ));
            }
            summary.sections.push(plan.info.short_name());
        }

        summary.emails_attempted = emails.len();
        summary.texts_attempted = texts.len();
        let (emails_sent, texts_sent) =
            tokio::join!(self.send_emails(emails), self.send_texts(texts));
        summary.emails_sent = emails_sent;
        summary.texts_sent = texts_sent;
        summary.duration = start.elapsed();

        self.report(&summary)?;
        Ok(CycleOutcome::Completed(summary))
    }

    async fn send_emails(&self, emails: Vec<EmailMessage>) -> usize {
        stream::iter(emails)
            .map(|message| async move {
                match self.mailer.send_email(&message).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(to = %message.to, error = %e, "Email failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.workers)
            .filter(|sent| futures::future::ready(*sent))
            .count()
            .await
    }

    async fn send_texts(&self, texts: Vec<SmsMessage>) -> usize {
        stream::iter(texts)
            .map(|message| async move {
                match self.texter.send_sms(&message).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(to = %message.to, error = %e, "SMS failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.workers)
            .filter(|sent| futures::future::ready(*sent))
            .count()
            .await
    }

    /// Writes the cycle summary to the operational logs and counters.
    fn report(&self, summary: &CycleSummary) -> Result<(), MonitorError> {
        if summary.emails_attempted > 0 && summary.emails_sent == 0 {
            error!(attempted = summary.emails_attempted, "Failed to send emails");
        }
        if summary.texts_attempted > 0 && summary.texts_sent == 0 {
            error!(attempted = summary.texts_attempted, "Failed to send texts");
        }

        let total = summary.total_sent();
        let secs = summary.duration.as_secs();
        let n_sections = summary.sections.len();
        let names = summary.sections.join(", ");

        info!(
            sent = total,
            emails = summary.emails_sent,
            texts = summary.texts_sent,
            sections = n_sections,
            courses = summary.courses_examined,
            skipped = summary.skipped_recipients,
            failed_batches = summary.failed_batches,
            duration_secs = secs,
            "Cycle complete"
        );

        if total == 0 {
            self.store.add_system_log(
                SystemLogKind::Cron,
                &format!("sent 0 notifs in {secs} seconds ({n_sections} sections)"),
                None,
            )?;
            return Ok(());
        }

        let message = format!("sent {total} notifs in {secs} seconds ({n_sections} sections): {names}");
        self.store.add_admin_log(&message)?;
        self.store.add_stats_notif_log(&format!(
            "{total} notif{} sent for {n_sections} section{}: {names}",
            if total == 1 { "" } else { "s" },
            if n_sections == 1 { "" } else { "s" },
        ))?;
        self.store
            .add_system_log(SystemLogKind::Cron, &message, None)?;
        self.store.increment_notif_counter(total as u64)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeProvider;
    use super::*;
    use crate::db::testing::{break_table, seeded_store};
    use crate::db::{SqliteStore, User};
    use crate::monitor::testing::FakeSource;
    use crate::notify::ThrottlePolicy;

    fn runner(
        store: Arc<SqliteStore>,
        source: Arc<FakeSource>,
        provider: Arc<FakeProvider>,
    ) -> CycleRunner {
        CycleRunner::new(
            store.clone(),
            Monitor::new(store.clone(), source, 20, 2),
            Throttle::new(store, ThrottlePolicy::default()),
            provider.clone(),
            provider,
            MessageLinks::new("https://snatch.tigerapps.org"),
            4,
        )
    }

    #[tokio::test]
    async fn test_seat_opens_for_three_waiters() {
        let store = Arc::new(seeded_store(
            false,
            &[("alice", false), ("bob", false), ("carol", false)],
        ));
        let source = Arc::new(FakeSource::with_section("40268", "002054", 9, 10));
        let provider = Arc::new(FakeProvider::default());
        let runner = runner(store.clone(), source, provider.clone());

        let CycleOutcome::Completed(summary) = runner.run_cycle().await.unwrap() else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.emails_sent, 3);
        assert_eq!(summary.texts_attempted, 0);
        assert_eq!(summary.sections, vec!["COS126 L01"]);
        assert_eq!(provider.emails.lock().unwrap().len(), 3);
        assert!(store.class_waitlist("40268").unwrap().is_empty());
        assert_eq!(store.notif_counters().unwrap(), (3, 3));
        assert_eq!(
            store.admin_logs().unwrap()[0],
            format!("sent 3 notifs in {} seconds (1 sections): COS126 L01", summary.duration.as_secs())
        );
    }

    #[tokio::test]
    async fn test_maintenance_kills_cycle() {
        let store = Arc::new(seeded_store(false, &[("alice", false)]));
        store.set_maintenance_mode(true).unwrap();
        let source = Arc::new(FakeSource::with_section("40268", "002054", 9, 10));
        let provider = Arc::new(FakeProvider::default());
        let runner = runner(store.clone(), source.clone(), provider.clone());

        assert_eq!(runner.run_cycle().await.unwrap(), CycleOutcome::Killed);
        assert_eq!(source.calls(), 0);
        assert!(provider.emails.lock().unwrap().is_empty());
        let cron = store.system_logs(SystemLogKind::Cron).unwrap();
        assert!(cron.iter().any(|l| l.message.contains("notifications script killed")));
        assert!(!cron.iter().any(|l| l.message.starts_with("sent")));
    }

    #[tokio::test]
    async fn test_no_openings_logs_zero_sent() {
        let store = Arc::new(seeded_store(false, &[("alice", false)]));
        let source = Arc::new(FakeSource::with_section("40268", "002054", 10, 10));
        let provider = Arc::new(FakeProvider::default());
        let runner = runner(store.clone(), source, provider);

        let CycleOutcome::Completed(summary) = runner.run_cycle().await.unwrap() else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.total_sent(), 0);
        let cron = store.system_logs(SystemLogKind::Cron).unwrap();
        assert!(cron.iter().any(|l| l.message.starts_with("sent 0 notifs")));
        assert_eq!(store.class_waitlist("40268").unwrap(), vec!["alice"]);
        assert_eq!(store.notif_counters().unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_partial_failures_are_counted() {
        let store = Arc::new(seeded_store(false, &[("alice", false), ("bob", false)]));
        store
            .upsert_user(&User {
                netid: "bob".into(),
                email: "bob@princeton.edu".into(),
                phone: Some("+16095551234".into()),
                auto_resub: false,
            })
            .unwrap();
        let source = Arc::new(FakeSource::with_section("40268", "002054", 8, 10));
        let provider = Arc::new(FakeProvider {
            fail_for: vec!["alice@princeton.edu".into()],
            ..FakeProvider::default()
        });
        let runner = runner(store.clone(), source, provider.clone());

        let CycleOutcome::Completed(summary) = runner.run_cycle().await.unwrap() else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.emails_attempted, 2);
        assert_eq!(summary.emails_sent, 1);
        assert_eq!(summary.texts_sent, 1);
        assert_eq!(store.notif_counters().unwrap(), (2, 2));
        // removal happened before sending, failed or not
        assert!(store.class_waitlist("40268").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_log_failure_still_notifies() {
        let store = Arc::new(seeded_store(false, &[("alice", false), ("bob", false)]));
        break_table(&store, "user_logs");
        let source = Arc::new(FakeSource::with_section("40268", "002054", 8, 10));
        let provider = Arc::new(FakeProvider::default());
        let runner = runner(store.clone(), source, provider.clone());

        let CycleOutcome::Completed(summary) = runner.run_cycle().await.unwrap() else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.emails_sent, 2);
        let mut sent: Vec<String> = provider
            .emails
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.to.clone())
            .collect();
        sent.sort();
        assert_eq!(sent, vec!["alice@princeton.edu", "bob@princeton.edu"]);
        assert!(store.class_waitlist("40268").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_logged_before_returning() {
        let store = Arc::new(seeded_store(false, &[("alice", false)]));
        break_table(&store, "waitlists");
        let source = Arc::new(FakeSource::with_section("40268", "002054", 8, 10));
        let provider = Arc::new(FakeProvider::default());
        let runner = runner(store.clone(), source.clone(), provider);

        assert!(matches!(runner.run_cycle().await, Err(MonitorError::Store(_))));
        assert_eq!(source.calls(), 0);
        let cron = store.system_logs(SystemLogKind::Cron).unwrap();
        assert!(cron
            .iter()
            .any(|l| l.message.starts_with("notifications script failed")));
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let store = Arc::new(seeded_store(false, &[]));
        let source = Arc::new(FakeSource::default());
        let provider = Arc::new(FakeProvider::default());
        let runner = runner(store, source, provider);

        let _held = runner.in_flight.lock().await;
        assert_eq!(runner.run_cycle().await.unwrap(), CycleOutcome::Skipped);
    }
}
