//! Notification windows: where they come from, how they are validated and
//! how the live job set follows them.

pub mod calendar;
mod runner;
pub mod sheet;

pub use calendar::CalendarSource;
pub use runner::{next_tick, NotifScheduler, RefreshOutcome, SchedulerSettings};
pub use sheet::SheetSource;

use crate::config::{ScheduleSourceConfig, SnatchConfig};
use crate::error::{FetchError, ScheduleError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const UNSCHEDULED: &str =
    "Next notifications period isn't scheduled. Notify a TigerApps member if this isn't fixed soon!";

/// Display format for window boundaries, e.g. "9/3 @ 6:35 AM".
const WINDOW_DISPLAY_FMT: &str = "%-m/%-d @ %-I:%M %p";

/// A half-open interval `[start, end)` during which cycles run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Checks that every boundary is strictly later than the previous one,
/// which rules out empty, reversed and overlapping windows alike.
pub fn validate_windows(windows: &[Window]) -> Result<(), ScheduleError> {
    let mut previous: Option<DateTime<Utc>> = None;
    for (index, window) in windows.iter().enumerate() {
        for boundary in [window.start, window.end] {
            if previous.is_some_and(|p| boundary <= p) {
                return Err(ScheduleError::NotMonotonic { index });
            }
            previous = Some(boundary);
        }
    }
    Ok(())
}

/// Human-readable status of the current or next window.
pub fn describe_current_or_next(
    windows: &[Window],
    now: DateTime<Utc>,
    tz: Tz,
) -> String {
    let Some(window) = windows.iter().find(|w| w.end > now) else {
        return UNSCHEDULED.to_string();
    };
    let end = format_local(window.end, tz);
    if window.start <= now {
        return format!("Current notifications period ending on {end}.");
    }
    format!(
        "Next notifications period: {} to {end}.",
        format_local(window.start, tz)
    )
}

pub fn format_local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format(WINDOW_DISPLAY_FMT).to_string()
}

/// Resolves a registrar wall-clock time. A repeated time (clocks falling
/// back) takes the earlier instant; a skipped time (clocks springing
/// forward) resolves one hour later.
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Something that can produce the list of notification windows.
///
/// An error means "no schedule available", never "empty schedule".
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Returns validated windows that have not ended by `now`.
    async fn windows(&self, now: DateTime<Utc>) -> Result<Vec<Window>, ScheduleError>;
}

/// Builds the configured schedule source.
pub fn source_from_config(
    config: &SnatchConfig,
    tz: Tz,
) -> Result<Arc<dyn ScheduleSource>, FetchError> {
    let client = Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| FetchError::Network {
            message: format!("Failed to build HTTP client: {}", e),
        })?;
    let start_offset = Duration::minutes(config.notifs_start_offset_mins);

    Ok(match &config.schedule_source {
        ScheduleSourceConfig::Calendar(calendar) => Arc::new(CalendarSource::new(
            client,
            calendar.clone(),
            tz,
            start_offset,
        )),
        ScheduleSourceConfig::Sheet { url } => {
            Arc::new(SheetSource::new(client, url.clone(), tz, start_offset))
        }
    })
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Network {
            message: format!("{url} returned {status}"),
        });
    }
    Ok(response.text().await?)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Window from minute offsets relative to a fixed epoch.
    pub fn window(start_min: i64, end_min: i64) -> Window {
        let base = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        Window::new(
            base + Duration::minutes(start_min),
            base + Duration::minutes(end_min),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::window;
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_validate_accepts_ordered_windows() {
        assert!(validate_windows(&[]).is_ok());
        assert!(validate_windows(&[window(0, 10), window(20, 30)]).is_ok());
    }

    #[test]
    fn test_validate_rejects_overlap_and_touching() {
        assert!(matches!(
            validate_windows(&[window(10, 20), window(15, 25)]),
            Err(ScheduleError::NotMonotonic { index: 1 })
        ));
        assert!(validate_windows(&[window(10, 20), window(20, 30)]).is_err());
        assert!(validate_windows(&[window(10, 10)]).is_err());
        assert!(validate_windows(&[window(20, 30), window(0, 10)]).is_err());
    }

    #[test]
    fn test_describe_states() {
        let tz = chrono_tz::America::New_York;
        let w = Window::new(
            Utc.with_ymd_and_hms(2030, 9, 3, 10, 35, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 9, 10, 21, 0, 0).unwrap(),
        );

        let before = Utc.with_ymd_and_hms(2030, 9, 1, 0, 0, 0).unwrap();
        assert_eq!(
            describe_current_or_next(&[w], before, tz),
            "Next notifications period: 9/3 @ 6:35 AM to 9/10 @ 5:00 PM."
        );

        let during = Utc.with_ymd_and_hms(2030, 9, 5, 0, 0, 0).unwrap();
        assert_eq!(
            describe_current_or_next(&[w], during, tz),
            "Current notifications period ending on 9/10 @ 5:00 PM."
        );

        let after = Utc.with_ymd_and_hms(2030, 9, 11, 0, 0, 0).unwrap();
        assert_eq!(describe_current_or_next(&[w], after, tz), UNSCHEDULED);
        assert_eq!(describe_current_or_next(&[], after, tz), UNSCHEDULED);
    }

    #[test]
    fn test_local_times_follow_daylight_saving() {
        let tz = chrono_tz::America::New_York;
        let at = |m, d, h| {
            local_to_utc(
                NaiveDate::from_ymd_opt(2030, m, d)
                    .unwrap()
                    .and_hms_opt(h, 30, 0)
                    .unwrap(),
                tz,
            )
            .unwrap()
        };
        // EDT in September, EST in December
        assert_eq!(at(9, 2, 6), Utc.with_ymd_and_hms(2030, 9, 2, 10, 30, 0).unwrap());
        assert_eq!(at(12, 2, 6), Utc.with_ymd_and_hms(2030, 12, 2, 11, 30, 0).unwrap());
        // 2:30 AM does not exist on 2030-03-10
        assert_eq!(at(3, 10, 2), Utc.with_ymd_and_hms(2030, 3, 10, 7, 30, 0).unwrap());
        // 1:30 AM happens twice on 2030-11-03; the EDT one comes first
        assert_eq!(at(11, 3, 1), Utc.with_ymd_and_hms(2030, 11, 3, 5, 30, 0).unwrap());
    }
}
