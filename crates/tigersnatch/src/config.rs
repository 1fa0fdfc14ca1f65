/// Configuration for the notifier: tunables from a JSON file, secrets from the environment
use crate::error::ConfigError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable naming the config file.
pub const CONFIG_PATH_VAR: &str = "TIGERSNATCH_CONFIG";

/// Default config file name.
pub const DEFAULT_CONFIG_PATH: &str = "tigersnatch.json";

/// Top-level notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnatchConfig {
    /// SQLite database file
    pub db_path: String,
    /// Address for the operator HTTP surface
    pub bind_address: String,
    /// Seconds between cycles inside an active window
    pub notifs_interval_secs: u64,
    /// Minutes between schedule re-derivations
    pub schedule_poll_mins: u64,
    /// Maximum notifications per (user, section) for auto-resubscribed users
    pub max_auto_resub_notifs: u32,
    /// Minimum minutes before re-alerting a user about an unchanged count
    pub min_notifs_delay_mins: i64,
    /// Random spread applied to `last_notif`, in minutes either way
    pub notif_jitter_mins: i64,
    /// Minutes added to every window start
    pub notifs_start_offset_mins: i64,
    /// Courses per seat-data request
    pub seat_batch_size: usize,
    /// Concurrent sends; 0 means available CPU cores
    pub dispatch_workers: usize,
    pub max_admin_log_length: usize,
    pub max_user_log_length: usize,
    /// IANA name of the registrar's time zone
    pub timezone: String,
    pub schedule_source: ScheduleSourceConfig,
    /// Operators emailed when the schedule changes
    pub admin_emails: Vec<String>,
    pub from_email: String,
    pub site_url: String,
    pub student_app_url: String,
    pub token_url: String,
}

impl Default for SnatchConfig {
    fn default() -> Self {
        Self {
            db_path: "tigersnatch.db".to_string(),
            bind_address: "127.0.0.1:8080".to_string(),
            notifs_interval_secs: 120,
            schedule_poll_mins: 10,
            max_auto_resub_notifs: 5,
            min_notifs_delay_mins: 60,
            notif_jitter_mins: 5,
            notifs_start_offset_mins: 5,
            seat_batch_size: 20,
            dispatch_workers: 0,
            max_admin_log_length: 100,
            max_user_log_length: 40,
            timezone: "America/New_York".to_string(),
            schedule_source: ScheduleSourceConfig::default(),
            admin_emails: Vec::new(),
            from_email: "tigersnatch@princeton.edu".to_string(),
            site_url: "https://snatch.tigerapps.org".to_string(),
            student_app_url: "https://api.princeton.edu:443/student-app/1.0.1".to_string(),
            token_url: "https://api.princeton.edu:443/token".to_string(),
        }
    }
}

/// Where notification windows come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSourceConfig {
    /// Derive windows from the registrar's iCalendar feed
    Calendar(CalendarConfig),
    /// Read windows verbatim from a CSV sheet (manual override)
    Sheet { url: String },
}

impl Default for ScheduleSourceConfig {
    fn default() -> Self {
        ScheduleSourceConfig::Calendar(CalendarConfig::default())
    }
}

/// Keyword matching and offsets used to turn calendar events into windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub ical_url: String,
    /// Titles opening a settle-in window (e.g. "add/drop")
    pub settle_keywords: Vec<String>,
    /// Titles yielding a single-day window (e.g. "course selection")
    pub single_day_keywords: Vec<String>,
    /// Titles matching any of these are ignored
    pub exclude_keywords: Vec<String>,
    /// Minutes after midnight local time
    pub settle_start_mins: i64,
    pub settle_end_mins: i64,
    pub single_day_start_mins: i64,
    pub single_day_end_mins: i64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            ical_url: "https://registrar.princeton.edu/feeds/events/ical.ics".to_string(),
            settle_keywords: vec!["add/drop".to_string()],
            single_day_keywords: vec!["course selection".to_string()],
            exclude_keywords: vec!["graduate student".to_string()],
            settle_start_mins: 6 * 60 + 30,
            settle_end_mins: 17 * 60,
            single_day_start_mins: 7 * 60 + 30,
            single_day_end_mins: 23 * 60 + 59,
        }
    }
}

impl SnatchConfig {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields the defaults; a present but invalid file is an error.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: SnatchConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the path in `TIGERSNATCH_CONFIG`.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from_file(Path::new(&path))
    }

    /// Rejects values the scheduler or detector cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notifs_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "notifs_interval_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.schedule_poll_mins == 0 {
            return Err(ConfigError::Invalid {
                field: "schedule_poll_mins",
                message: "must be positive".to_string(),
            });
        }
        if self.seat_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "seat_batch_size",
                message: "must be positive".to_string(),
            });
        }
        self.local_zone()?;
        for (field, value) in [
            ("student_app_url", &self.student_app_url),
            ("token_url", &self.token_url),
            ("site_url", &self.site_url),
        ] {
            Url::parse(value).map_err(|e| ConfigError::Invalid {
                field,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn notifs_interval(&self) -> Duration {
        Duration::from_secs(self.notifs_interval_secs)
    }

    pub fn schedule_poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_poll_mins * 60)
    }

    /// Registrar local time zone, daylight saving included.
    pub fn local_zone(&self) -> Result<Tz, ConfigError> {
        self.timezone.parse::<Tz>().map_err(|e| ConfigError::Invalid {
            field: "timezone",
            message: e.to_string(),
        })
    }

    /// Worker count for the dispatch pool.
    pub fn dispatch_workers(&self) -> usize {
        if self.dispatch_workers > 0 {
            return self.dispatch_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// Provider credentials, read from the environment only
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub sendgrid_api_key: Option<String>,
    pub twilio_sid: Option<String>,
    pub twilio_token: Option<String>,
    pub twilio_phone: Option<String>,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            sendgrid_api_key: var("SENDGRID_API_KEY"),
            twilio_sid: var("TWILIO_SID"),
            twilio_token: var("TWILIO_TOKEN"),
            twilio_phone: var("TWILIO_PHONE"),
            consumer_key: var("CONSUMER_KEY"),
            consumer_secret: var("CONSUMER_SECRET"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SnatchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SnatchConfig =
            serde_json::from_str(r#"{"notifs_interval_secs": 30, "schedule_source": {"kind": "sheet", "url": "https://example.com/s.csv"}}"#)
                .unwrap();
        assert_eq!(config.notifs_interval_secs, 30);
        assert_eq!(config.max_auto_resub_notifs, 5);
        assert!(matches!(config.schedule_source, ScheduleSourceConfig::Sheet { .. }));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = SnatchConfig {
            notifs_interval_secs: 0,
            ..SnatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "notifs_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_timezone_is_named_zone() {
        assert_eq!(SnatchConfig::default().local_zone().unwrap(), chrono_tz::America::New_York);

        let config = SnatchConfig {
            timezone: "US/Nowhere".to_string(),
            ..SnatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "timezone",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = SnatchConfig::load_from_file(Path::new("/nonexistent/tigersnatch.json")).unwrap();
        assert_eq!(config.seat_batch_size, 20);
    }
}
