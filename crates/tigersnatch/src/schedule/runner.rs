//! Runs cycles inside notification windows and follows schedule changes.
//!
//! Every window gets its own task: it sleeps until the window opens, turns
//! the notifications indicator on, fires a cycle every interval and turns
//! the indicator off when the window closes. The tasks of one schedule
//! form a job set sharing a cancellation token; replacing the schedule
//! cancels the set and waits for its tasks, so a cycle already running is
//! allowed to finish.

use super::{describe_current_or_next, format_local, validate_windows, ScheduleSource, Window};
use crate::db::{LiveStatus, Store, SystemLogKind};
use crate::dispatch::{CycleOutcome, CycleRunner};
use crate::error::{ScheduleError, StoreError};
use crate::notify::{EmailMessage, Mailer};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between cycles inside a window
    pub interval: std::time::Duration,
    /// Time between schedule re-derivations
    pub poll_interval: std::time::Duration,
    pub tz: Tz,
    /// Operators told about schedule changes
    pub admin_emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unchanged,
    Replaced { windows: usize },
}

struct JobSet {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Returns the first cycle start at or after `not_before`.
///
/// Cycle starts are aligned to `window.start` in steps of `interval`; a
/// start leaving less than one full interval before `window.end` is
/// suppressed.
pub fn next_tick(
    window: &Window,
    interval: Duration,
    not_before: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let step = interval.num_milliseconds();
    if step <= 0 {
        return None;
    }
    let not_before = not_before.max(window.start);
    let elapsed = (not_before - window.start).num_milliseconds();
    let steps = (elapsed + step - 1) / step;
    let tick = window.start + Duration::milliseconds(steps * step);
    (tick + interval <= window.end).then_some(tick)
}

/// Sleeps until `at`; returns false if cancelled first.
async fn sleep_until(at: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let wait = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

fn log_store_error(result: Result<(), StoreError>, what: &str) {
    if let Err(e) = result {
        error!(error = %e, "Failed to {what}");
    }
}

/// Task body for a single window: pending, active, closed.
async fn run_window(
    window: Window,
    interval: Duration,
    store: Arc<dyn Store>,
    runner: Arc<CycleRunner>,
    cancel: CancellationToken,
) {
    if Utc::now() >= window.end {
        return;
    }
    if !sleep_until(window.start, &cancel).await {
        return;
    }

    info!(start = %window.start, end = %window.end, "Notification window opened");
    log_store_error(store.set_notifs_active(true), "turn notifications on");

    let mut not_before = Utc::now();
    while let Some(tick) = next_tick(&window, interval, not_before) {
        if !sleep_until(tick, &cancel).await {
            return;
        }

        match store.trigger_enabled() {
            Ok(true) => match runner.run_cycle().await {
                Ok(CycleOutcome::Completed(summary)) => {
                    debug!(sent = summary.total_sent(), "Cycle finished")
                }
                Ok(outcome) => debug!(?outcome, "Cycle did not run"),
                Err(e) => error!(error = %e, "Cycle failed"),
            },
            Ok(false) => debug!("Cycle trigger disabled, skipping tick"),
            Err(e) => error!(error = %e, "Failed to read trigger toggle"),
        }

        not_before = Utc::now().max(tick + interval);
        let status = match next_tick(&window, interval, not_before) {
            Some(next) => LiveStatus::Countdown {
                seconds: u64::try_from((next - Utc::now()).num_seconds() + 1).unwrap_or(0),
            },
            None => LiveStatus::Inactive,
        };
        log_store_error(store.set_live_status(&status), "update live status");
    }

    if !sleep_until(window.end, &cancel).await {
        return;
    }
    info!(end = %window.end, "Notification window closed");
    log_store_error(store.set_notifs_active(false), "turn notifications off");
    log_store_error(store.set_live_status(&LiveStatus::Inactive), "update live status");
}

/// Owns the live job set and keeps it in sync with the schedule source.
pub struct NotifScheduler {
    store: Arc<dyn Store>,
    runner: Arc<CycleRunner>,
    source: Arc<dyn ScheduleSource>,
    mailer: Option<Arc<dyn Mailer>>,
    settings: SchedulerSettings,
    jobs: Mutex<Option<JobSet>>,
}

impl NotifScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<CycleRunner>,
        source: Arc<dyn ScheduleSource>,
        mailer: Option<Arc<dyn Mailer>>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            runner,
            source,
            mailer,
            settings,
            jobs: Mutex::new(None),
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_std(self.settings.interval).unwrap_or_else(|_| Duration::minutes(2))
    }

    async fn derive(&self) -> Result<Vec<Window>, ScheduleError> {
        let windows = self.source.windows(Utc::now()).await?;
        validate_windows(&windows)?;
        Ok(windows)
    }

    /// Derives the schedule once and installs it. When the source is
    /// unavailable the persisted schedule is used instead.
    pub async fn start(&self) -> Result<Vec<Window>, ScheduleError> {
        let windows = match self.derive().await {
            Ok(windows) => windows,
            Err(e) => {
                warn!(error = %e, "Schedule source unavailable, using persisted schedule");
                let persisted = self.store.notifs_schedule()?;
                match validate_windows(&persisted) {
                    Ok(()) => persisted,
                    Err(e) => {
                        error!(error = %e, "Persisted schedule is invalid, starting unscheduled");
                        Vec::new()
                    }
                }
            }
        };
        self.install(windows.clone()).await?;
        Ok(windows)
    }

    /// Re-derives the schedule and replaces the job set if it changed.
    ///
    /// An unavailable or invalid schedule leaves the current one in place.
    pub async fn refresh(&self) -> Result<RefreshOutcome, ScheduleError> {
        let derived = match self.derive().await {
            Ok(windows) => windows,
            Err(e) => {
                warn!(error = %e, "Rejected derived schedule, keeping previous");
                self.store.add_system_log(
                    SystemLogKind::Cron,
                    &format!("notifications schedule not updated: {e}"),
                    None,
                )?;
                return Err(e);
            }
        };

        let persisted = self.store.notifs_schedule()?;
        if derived == persisted && self.jobs.lock().await.is_some() {
            debug!("Notification schedule unchanged");
            return Ok(RefreshOutcome::Unchanged);
        }

        let windows = derived.len();
        self.install(derived.clone()).await?;
        self.store.add_admin_log(&format!(
            "notifications schedule updated ({windows} windows)"
        ))?;
        self.notify_admins(&derived).await;
        Ok(RefreshOutcome::Replaced { windows })
    }

    /// Tears down the current job set, persists `windows` and spawns a new set.
    pub async fn install(&self, windows: Vec<Window>) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(old) = jobs.take() {
            Self::teardown(old).await;
        }

        self.store.set_notifs_active(false)?;
        self.store.set_live_status(&LiveStatus::Inactive)?;
        self.store.set_notifs_schedule(&windows)?;

        let cancel = CancellationToken::new();
        let interval = self.interval();
        let now = Utc::now();
        let handles = windows
            .into_iter()
            .filter(|w| w.end > now)
            .map(|window| {
                tokio::spawn(run_window(
                    window,
                    interval,
                    self.store.clone(),
                    self.runner.clone(),
                    cancel.child_token(),
                ))
            })
            .collect::<Vec<_>>();

        info!(jobs = handles.len(), "Installed notification job set");
        *jobs = Some(JobSet { cancel, handles });
        Ok(())
    }

    async fn teardown(set: JobSet) {
        set.cancel.cancel();
        for handle in set.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Window job panicked");
            }
        }
    }

    /// Cancels all jobs, waiting for a running cycle to finish.
    pub async fn shutdown(&self) {
        if let Some(set) = self.jobs.lock().await.take() {
            Self::teardown(set).await;
        }
        log_store_error(self.store.set_notifs_active(false), "turn notifications off");
        log_store_error(
            self.store.set_live_status(&LiveStatus::Inactive),
            "update live status",
        );
        info!("Notification scheduler stopped");
    }

    /// Starts the schedule and re-derives it every poll interval until `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if let Err(e) = self.start().await {
            error!(error = %e, "Failed to start notification schedule");
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(RefreshOutcome::Replaced { windows }) => {
                            info!(windows, "Notification schedule replaced")
                        }
                        Ok(RefreshOutcome::Unchanged) => {}
                        Err(e) => warn!(error = %e, "Schedule refresh failed"),
                    }
                }
            }
        }
        self.shutdown().await;
    }

    pub fn enable_trigger(&self) -> Result<(), StoreError> {
        self.store.set_trigger_enabled(true)
    }

    pub fn disable_trigger(&self) -> Result<(), StoreError> {
        self.store.set_trigger_enabled(false)
    }

    pub fn current_or_next_window_description(&self) -> Result<String, StoreError> {
        let windows = self.store.notifs_schedule()?;
        Ok(describe_current_or_next(&windows, Utc::now(), self.settings.tz))
    }

    async fn notify_admins(&self, windows: &[Window]) {
        let Some(mailer) = &self.mailer else {
            return;
        };
        let items: String = windows
            .iter()
            .map(|w| {
                format!(
                    "<li>{} to {}</li>",
                    format_local(w.start, self.settings.tz),
                    format_local(w.end, self.settings.tz)
                )
            })
            .collect();
        let html = format!(
            "<html><body><p>The notifications schedule changed. New windows:</p><ul>{items}</ul></body></html>"
        );

        for to in &self.settings.admin_emails {
            let message = EmailMessage {
                to: to.clone(),
                subject: "TigerSnatch: notifications schedule updated".to_string(),
                html: html.clone(),
            };
            if let Err(e) = mailer.send_email(&message).await {
                warn!(to = %to, error = %e, "Failed to email schedule change");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::seeded_store;
    use crate::db::SqliteStore;
    use crate::dispatch::testing::FakeProvider;
    use crate::error::FetchError;
    use crate::monitor::testing::FakeSource;
    use crate::monitor::Monitor;
    use crate::notify::{MessageLinks, Throttle, ThrottlePolicy};
    use crate::schedule::testing::window;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeSchedule(StdMutex<Result<Vec<Window>, ScheduleError>>);

    impl FakeSchedule {
        fn returning(result: Result<Vec<Window>, ScheduleError>) -> Arc<Self> {
            Arc::new(Self(StdMutex::new(result)))
        }

        fn set(&self, result: Result<Vec<Window>, ScheduleError>) {
            *self.0.lock().unwrap() = result;
        }
    }

    #[async_trait]
    impl ScheduleSource for FakeSchedule {
        async fn windows(&self, _now: DateTime<Utc>) -> Result<Vec<Window>, ScheduleError> {
            self.0.lock().unwrap().clone()
        }
    }

    fn cycle_runner(store: Arc<SqliteStore>) -> Arc<CycleRunner> {
        let provider = Arc::new(FakeProvider::default());
        Arc::new(CycleRunner::new(
            store.clone(),
            Monitor::new(store.clone(), Arc::new(FakeSource::default()), 20, 1),
            Throttle::new(store, ThrottlePolicy::default()),
            provider.clone(),
            provider,
            MessageLinks::new("https://snatch.tigerapps.org"),
            2,
        ))
    }

    fn scheduler(
        store: Arc<SqliteStore>,
        source: Arc<FakeSchedule>,
        mailer: Arc<FakeProvider>,
    ) -> NotifScheduler {
        NotifScheduler::new(
            store.clone(),
            cycle_runner(store),
            source,
            Some(mailer),
            SchedulerSettings {
                interval: std::time::Duration::from_secs(120),
                poll_interval: std::time::Duration::from_secs(600),
                tz: chrono_tz::America::New_York,
                admin_emails: vec!["ops@princeton.edu".to_string()],
            },
        )
    }

    fn cycles_run(store: &SqliteStore) -> usize {
        store
            .system_logs(SystemLogKind::Cron)
            .unwrap()
            .iter()
            .filter(|l| l.message == "notifications script executing")
            .count()
    }

    #[test]
    fn test_next_tick_alignment_and_last_tick_suppression() {
        let w = window(0, 10);
        let interval = Duration::minutes(3);
        assert_eq!(next_tick(&w, interval, w.start - Duration::hours(1)), Some(w.start));
        assert_eq!(
            next_tick(&w, interval, w.start + Duration::seconds(1)),
            Some(w.start + Duration::minutes(3))
        );
        assert_eq!(
            next_tick(&w, interval, w.start + Duration::minutes(6)),
            Some(w.start + Duration::minutes(6))
        );
        // 9 minutes in would leave only one minute before the end
        assert_eq!(next_tick(&w, interval, w.start + Duration::minutes(7)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_job_runs_each_interval_then_closes() {
        let store = Arc::new(seeded_store(false, &[]));
        let start = Utc::now() + Duration::seconds(1);
        let w = Window::new(start, start + Duration::seconds(600));

        run_window(
            w,
            Duration::seconds(120),
            store.clone(),
            cycle_runner(store.clone()),
            CancellationToken::new(),
        )
        .await;

        // ticks at +0, +120, +240, +360, +480
        assert_eq!(cycles_run(&store), 5);
        assert!(!store.notifs_active().unwrap());
        assert_eq!(store.live_status().unwrap(), LiveStatus::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_trigger_skips_cycles() {
        let store = Arc::new(seeded_store(false, &[]));
        store.set_trigger_enabled(false).unwrap();
        let start = Utc::now() + Duration::seconds(1);
        let w = Window::new(start, start + Duration::seconds(600));

        run_window(
            w,
            Duration::seconds(120),
            store.clone(),
            cycle_runner(store.clone()),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(cycles_run(&store), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pending_window_never_activates() {
        let store = Arc::new(seeded_store(false, &[]));
        let start = Utc::now() + Duration::seconds(60);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_window(
            Window::new(start, start + Duration::seconds(600)),
            Duration::seconds(120),
            store.clone(),
            cycle_runner(store.clone()),
            cancel.clone(),
        ));

        cancel.cancel();
        handle.await.unwrap();
        assert!(!store.notifs_active().unwrap());
        assert_eq!(cycles_run(&store), 0);
    }

    #[tokio::test]
    async fn test_rejected_schedule_keeps_previous() {
        let store = Arc::new(seeded_store(false, &[]));
        let previous = vec![window(0, 5)];
        let source = FakeSchedule::returning(Ok(vec![window(10, 20), window(15, 25)]));
        let scheduler = scheduler(store.clone(), source, Arc::new(FakeProvider::default()));
        scheduler.install(previous.clone()).await.unwrap();

        let err = scheduler.refresh().await.unwrap_err();
        assert!(matches!(err, ScheduleError::NotMonotonic { index: 1 }));
        assert_eq!(store.notifs_schedule().unwrap(), previous);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_changed_schedule_is_replaced_and_announced() {
        let store = Arc::new(seeded_store(false, &[]));
        let source = FakeSchedule::returning(Ok(vec![window(0, 5)]));
        let mailer = Arc::new(FakeProvider::default());
        let scheduler = scheduler(store.clone(), source.clone(), mailer.clone());
        scheduler.start().await.unwrap();

        assert_eq!(scheduler.refresh().await.unwrap(), RefreshOutcome::Unchanged);

        source.set(Ok(vec![window(0, 5), window(60, 90)]));
        assert_eq!(
            scheduler.refresh().await.unwrap(),
            RefreshOutcome::Replaced { windows: 2 }
        );
        assert_eq!(store.notifs_schedule().unwrap().len(), 2);
        let sent = mailer.emails.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@princeton.edu");
        drop(sent);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_startup_falls_back_to_persisted_schedule() {
        let store = Arc::new(seeded_store(false, &[]));
        store.set_notifs_schedule(&[window(0, 5)]).unwrap();
        let source = FakeSchedule::returning(Err(ScheduleError::Unavailable(FetchError::Network {
            message: "timed out".into(),
        })));
        let scheduler = scheduler(store.clone(), source, Arc::new(FakeProvider::default()));

        assert_eq!(scheduler.start().await.unwrap(), vec![window(0, 5)]);
        assert_eq!(store.notifs_schedule().unwrap(), vec![window(0, 5)]);
        assert!(scheduler
            .current_or_next_window_description()
            .unwrap()
            .starts_with("Next notifications period: 12/31 @ 7:00 PM"));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_trigger_toggles() {
        let store = Arc::new(seeded_store(false, &[]));
        let scheduler = scheduler(
            store.clone(),
            FakeSchedule::returning(Ok(vec![])),
            Arc::new(FakeProvider::default()),
        );
        scheduler.disable_trigger().unwrap();
        assert!(!store.trigger_enabled().unwrap());
        scheduler.enable_trigger().unwrap();
        assert!(store.trigger_enabled().unwrap());
        // the window indicator is independent of the trigger toggle
        assert!(!store.notifs_active().unwrap());
    }
}
