/// Record types crossing the store boundary
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A section with at least one waiting user, joined with its parent course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitedSection {
    pub classid: String,
    pub courseid: String,
    pub course_displayname: String,
}

/// Display information for one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub classid: String,
    pub courseid: String,
    /// e.g. "COS126"
    pub course_displayname: String,
    pub course_title: String,
    /// e.g. "L01"
    pub section_name: String,
}

impl ClassInfo {
    /// "COS126 L01"
    pub fn short_name(&self) -> String {
        format!("{} {}", self.course_displayname, self.section_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub netid: String,
    pub email: String,
    pub phone: Option<String>,
    pub auto_resub: bool,
}

/// Per (user, section) notification history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifRecord {
    /// Last open-spot count the user was told about
    pub n_open_spots: u32,
    pub last_notif: DateTime<Utc>,
    pub num_notifs: u32,
}

/// Course row as written by the course updater.
#[derive(Debug, Clone)]
pub struct DbCourse {
    pub courseid: String,
    pub displayname: String,
    pub title: String,
    pub has_reserved_seats: bool,
    pub disabled: bool,
}

/// Section row as written by the course updater.
#[derive(Debug, Clone)]
pub struct DbSection {
    pub classid: String,
    pub courseid: String,
    pub section_name: String,
    pub capacity: i64,
    pub enrollment: i64,
    pub status_is_open: bool,
}

/// State shown by the external status display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LiveStatus {
    Inactive,
    Active { description: String },
    Countdown { seconds: u64 },
}

/// Category of a system log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemLogKind {
    Cron,
    Subscription,
    Monitor,
}

impl SystemLogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemLogKind::Cron => "cron",
            SystemLogKind::Subscription => "subscription",
            SystemLogKind::Monitor => "monitor",
        }
    }
}

/// A stored system log record.
#[derive(Debug, Clone)]
pub struct SystemLog {
    pub kind: String,
    pub message: String,
    pub netid: Option<String>,
    pub created_at: DateTime<Utc>,
}
