/// Persistence for waitlists, enrollment baselines, notification history and operational state

mod types;

pub use types::{
    ClassInfo, DbCourse, DbSection, LiveStatus, NotifRecord, SystemLog, SystemLogKind, User,
    WaitedSection,
};

use crate::error::StoreError;
use crate::schedule::Window;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const SCHEMA_SQL: &str = include_str!("../../../../sql/init_tigersnatch.sql");

/// Operations the notifier needs from persistent storage.
///
/// Implementations must keep waitlist membership symmetric: a section's
/// waiters and a user's waited sections are two views of the same data.
pub trait Store: Send + Sync {
    // Waitlists

    /// All sections with at least one waiter.
    fn waited_sections(&self) -> Result<Vec<WaitedSection>, StoreError>;
    fn class_waitlist(&self, classid: &str) -> Result<Vec<String>, StoreError>;
    fn user_waitlists(&self, netid: &str) -> Result<Vec<String>, StoreError>;
    fn add_to_waitlist(&self, netid: &str, classid: &str) -> Result<(), StoreError>;
    fn remove_from_waitlist(&self, netid: &str, classid: &str) -> Result<(), StoreError>;

    // Course metadata

    fn class_info(&self, classid: &str) -> Result<ClassInfo, StoreError>;
    fn has_reserved_seats(&self, courseid: &str) -> Result<bool, StoreError>;
    fn disabled_courses(&self) -> Result<HashSet<String>, StoreError>;
    fn current_term_code(&self) -> Result<String, StoreError>;

    // Enrollment snapshot (reserved-seat courses only)

    /// Defaults to 0, which never triggers a notification.
    fn prev_enrollment(&self, classid: &str) -> Result<i64, StoreError>;
    fn set_prev_enrollment(&self, classid: &str, enrollment: i64) -> Result<(), StoreError>;

    // Users and notification history

    fn user(&self, netid: &str) -> Result<Option<User>, StoreError>;
    fn notif_record(&self, netid: &str, classid: &str) -> Result<Option<NotifRecord>, StoreError>;
    /// Records that `notified` were told about `n_open_spots` spots in `classid`.
    ///
    /// Non-reserved sections set `n_open_spots` for every subscriber and bump
    /// `last_notif`/`num_notifs` for the notified users; reserved-seat sections
    /// only bump `num_notifs`.
    fn update_notifs_history(
        &self,
        notified: &[String],
        classid: &str,
        n_open_spots: u32,
        reserved_seats: bool,
        notified_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    fn append_user_log(&self, netid: &str, entry: &str) -> Result<(), StoreError>;

    // Operational logs

    fn add_admin_log(&self, message: &str) -> Result<(), StoreError>;
    fn add_system_log(
        &self,
        kind: SystemLogKind,
        message: &str,
        netid: Option<&str>,
    ) -> Result<(), StoreError>;
    fn add_stats_notif_log(&self, message: &str) -> Result<(), StoreError>;
    /// Adds `n` to both the all-time and the current-period counters.
    fn increment_notif_counter(&self, n: u64) -> Result<(), StoreError>;

    // Flags and schedule

    fn maintenance_mode(&self) -> Result<bool, StoreError>;
    fn set_maintenance_mode(&self, on: bool) -> Result<(), StoreError>;
    /// Whether a notification window is currently open.
    fn notifs_active(&self) -> Result<bool, StoreError>;
    fn set_notifs_active(&self, on: bool) -> Result<(), StoreError>;
    /// Operator toggle for the cycle trigger, independent of windows.
    fn trigger_enabled(&self) -> Result<bool, StoreError>;
    fn set_trigger_enabled(&self, on: bool) -> Result<(), StoreError>;
    fn live_status(&self) -> Result<LiveStatus, StoreError>;
    fn set_live_status(&self, status: &LiveStatus) -> Result<(), StoreError>;
    fn notifs_schedule(&self) -> Result<Vec<Window>, StoreError>;
    fn set_notifs_schedule(&self, windows: &[Window]) -> Result<(), StoreError>;
}

/// Retention limits for the bounded logs.
#[derive(Debug, Clone, Copy)]
pub struct LogLimits {
    pub max_admin_logs: usize,
    pub max_user_logs: usize,
    pub max_stats_notif_logs: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            max_admin_logs: 100,
            max_user_logs: 40,
            max_stats_notif_logs: 5,
        }
    }
}

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    db: Mutex<Connection>,
    limits: LogLimits,
}

impl SqliteStore {
    /// Opens (or creates) the database file and initializes the schema.
    pub fn open(db_path: &str, limits: LogLimits) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, limits)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, LogLimits::default())
    }

    fn with_connection(conn: Connection, limits: LogLimits) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Mutex::new(conn),
            limits,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Database {
            message: "connection mutex poisoned".to_string(),
        })
    }

    fn get_admin(&self, db: &Connection, key: &str) -> Result<String, StoreError> {
        db.query_row("SELECT value FROM admin WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or_else(|| StoreError::Malformed {
            key: key.to_string(),
            message: "missing admin key".to_string(),
        })
    }

    fn set_admin(&self, db: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
        db.execute(
            "INSERT INTO admin (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key, value),
        )?;
        Ok(())
    }

    fn get_flag(&self, key: &str, on_value: &str) -> Result<bool, StoreError> {
        let db = self.conn()?;
        Ok(self.get_admin(&db, key)? == on_value)
    }

    fn get_counter(&self, db: &Connection, key: &str) -> Result<u64, StoreError> {
        let raw = self.get_admin(db, key)?;
        raw.parse().map_err(|_| StoreError::Malformed {
            key: key.to_string(),
            message: format!("`{raw}` is not a counter"),
        })
    }

    fn insert_system_log(
        &self,
        db: &Connection,
        kind: SystemLogKind,
        message: &str,
        netid: Option<&str>,
    ) -> Result<(), StoreError> {
        db.execute(
            "INSERT INTO system_logs (kind, message, netid, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), message, netid, Utc::now()],
        )?;
        Ok(())
    }

    // ─── Population (used by the course updater and tests) ───────────

    /// Inserts or replaces a course row.
    pub fn upsert_course(&self, course: &DbCourse) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO courses (courseid, displayname, title, has_reserved_seats, disabled)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(courseid) DO UPDATE SET
                displayname = excluded.displayname,
                title = excluded.title,
                has_reserved_seats = excluded.has_reserved_seats,
                disabled = excluded.disabled",
            params![
                course.courseid,
                course.displayname,
                course.title,
                course.has_reserved_seats,
                course.disabled
            ],
        )?;
        Ok(())
    }

    /// Inserts or updates a section row, keeping its enrollment baseline.
    pub fn upsert_section(&self, section: &DbSection) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO sections (classid, courseid, section_name, capacity, enrollment, status_is_open)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(classid) DO UPDATE SET
                courseid = excluded.courseid,
                section_name = excluded.section_name,
                capacity = excluded.capacity,
                enrollment = excluded.enrollment,
                status_is_open = excluded.status_is_open",
            params![
                section.classid,
                section.courseid,
                section.section_name,
                section.capacity,
                section.enrollment,
                section.status_is_open
            ],
        )?;
        Ok(())
    }

    /// Inserts or replaces a user row.
    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO users (netid, email, phone, auto_resub) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(netid) DO UPDATE SET
                email = excluded.email,
                phone = excluded.phone,
                auto_resub = excluded.auto_resub",
            params![user.netid, user.email, user.phone, user.auto_resub],
        )?;
        Ok(())
    }

    pub fn set_current_term_code(&self, code: &str) -> Result<(), StoreError> {
        let db = self.conn()?;
        self.set_admin(&db, "current_term_code", code)
    }

    /// Overwrites a notification record; the user must be on the waitlist.
    pub fn set_notif_record(
        &self,
        netid: &str,
        classid: &str,
        record: &NotifRecord,
    ) -> Result<(), StoreError> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE notifs SET n_open_spots = ?3, last_notif = ?4, num_notifs = ?5
             WHERE netid = ?1 AND classid = ?2",
            params![
                netid,
                classid,
                record.n_open_spots,
                record.last_notif,
                record.num_notifs
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotOnWaitlist {
                netid: netid.to_string(),
                classid: classid.to_string(),
            });
        }
        Ok(())
    }

    // ─── Readers for operators and tests ─────────────────────────────

    /// Admin log messages, newest first.
    pub fn admin_logs(&self) -> Result<Vec<String>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT message FROM admin_logs ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>().map_err(Into::into)
    }

    /// System log records of one kind, oldest first.
    pub fn system_logs(&self, kind: SystemLogKind) -> Result<Vec<SystemLog>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT kind, message, netid, created_at FROM system_logs WHERE kind = ? ORDER BY id",
        )?;
        let rows = stmt.query_map([kind.as_str()], |row| {
            Ok(SystemLog {
                kind: row.get(0)?,
                message: row.get(1)?,
                netid: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn stats_notif_logs(&self) -> Result<Vec<String>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT message FROM stats_notif_logs ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>().map_err(Into::into)
    }

    pub fn user_logs(&self, netid: &str) -> Result<Vec<String>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT entry FROM user_logs WHERE netid = ? ORDER BY id DESC")?;
        let rows = stmt.query_map([netid], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>().map_err(Into::into)
    }

    /// (all-time, current-period) notification counters.
    pub fn notif_counters(&self) -> Result<(u64, u64), StoreError> {
        let db = self.conn()?;
        Ok((
            self.get_counter(&db, "stats_total_notifs")?,
            self.get_counter(&db, "stats_current_notifs")?,
        ))
    }
}

impl Store for SqliteStore {
    fn waited_sections(&self) -> Result<Vec<WaitedSection>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT DISTINCT w.classid, s.courseid, c.displayname
             FROM waitlists w
             JOIN sections s ON w.classid = s.classid
             JOIN courses c ON s.courseid = c.courseid
             ORDER BY s.courseid, w.classid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WaitedSection {
                classid: row.get(0)?,
                courseid: row.get(1)?,
                course_displayname: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn class_waitlist(&self, classid: &str) -> Result<Vec<String>, StoreError> {
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT netid FROM waitlists WHERE classid = ? ORDER BY joined_at, netid")?;
        let rows = stmt.query_map([classid], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>().map_err(Into::into)
    }

    fn user_waitlists(&self, netid: &str) -> Result<Vec<String>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT classid FROM waitlists WHERE netid = ? ORDER BY classid")?;
        let rows = stmt.query_map([netid], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>().map_err(Into::into)
    }

    fn add_to_waitlist(&self, netid: &str, classid: &str) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let user_exists: bool =
            tx.query_row("SELECT COUNT(*) FROM users WHERE netid = ?", [netid], |row| {
                row.get::<_, i64>(0).map(|n| n > 0)
            })?;
        if !user_exists {
            return Err(StoreError::UnknownUser {
                netid: netid.to_string(),
            });
        }
        let displayname: Option<String> = tx
            .query_row(
                "SELECT c.displayname FROM sections s JOIN courses c ON s.courseid = c.courseid
                 WHERE s.classid = ?",
                [classid],
                |row| row.get(0),
            )
            .optional()?;
        let Some(displayname) = displayname else {
            return Err(StoreError::UnknownClass {
                classid: classid.to_string(),
            });
        };

        let now = Utc::now();
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO waitlists (classid, netid, joined_at) VALUES (?1, ?2, ?3)",
            params![classid, netid, now],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyOnWaitlist {
                netid: netid.to_string(),
                classid: classid.to_string(),
            });
        }
        tx.execute(
            "INSERT OR REPLACE INTO notifs (netid, classid, n_open_spots, last_notif, num_notifs)
             VALUES (?1, ?2, 0, ?3, 0)",
            params![netid, classid, now],
        )?;
        self.insert_system_log(
            &tx,
            SystemLogKind::Subscription,
            &format!("User {netid} subscribed to class {classid} ({displayname})"),
            Some(netid),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove_from_waitlist(&self, netid: &str, classid: &str) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let removed = tx.execute(
            "DELETE FROM waitlists WHERE classid = ?1 AND netid = ?2",
            (classid, netid),
        )?;
        if removed == 0 {
            return Err(StoreError::NotOnWaitlist {
                netid: netid.to_string(),
                classid: classid.to_string(),
            });
        }
        tx.execute(
            "DELETE FROM notifs WHERE netid = ?1 AND classid = ?2",
            (netid, classid),
        )?;

        // An emptied reserved-seat section starts over from a zero baseline
        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM waitlists WHERE classid = ?",
            [classid],
            |row| row.get(0),
        )?;
        let (displayname, reserved): (String, bool) = tx.query_row(
            "SELECT c.displayname, c.has_reserved_seats FROM sections s
             JOIN courses c ON s.courseid = c.courseid WHERE s.classid = ?",
            [classid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if remaining == 0 && reserved {
            tx.execute(
                "UPDATE sections SET prev_enrollment = 0 WHERE classid = ?",
                [classid],
            )?;
        }

        self.insert_system_log(
            &tx,
            SystemLogKind::Subscription,
            &format!("User {netid} unsubscribed from class {classid} ({displayname})"),
            Some(netid),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn class_info(&self, classid: &str) -> Result<ClassInfo, StoreError> {
        let db = self.conn()?;
        db.query_row(
            "SELECT s.classid, s.courseid, c.displayname, c.title, s.section_name
             FROM sections s JOIN courses c ON s.courseid = c.courseid
             WHERE s.classid = ?",
            [classid],
            |row| {
                Ok(ClassInfo {
                    classid: row.get(0)?,
                    courseid: row.get(1)?,
                    course_displayname: row.get(2)?,
                    course_title: row.get(3)?,
                    section_name: row.get(4)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::UnknownClass {
            classid: classid.to_string(),
        })
    }

    fn has_reserved_seats(&self, courseid: &str) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let reserved: Option<bool> = db
            .query_row(
                "SELECT has_reserved_seats FROM courses WHERE courseid = ?",
                [courseid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reserved.unwrap_or(false))
    }

    fn disabled_courses(&self) -> Result<HashSet<String>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT courseid FROM courses WHERE disabled = 1")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<HashSet<String>, _>>().map_err(Into::into)
    }

    fn current_term_code(&self) -> Result<String, StoreError> {
        let db = self.conn()?;
        self.get_admin(&db, "current_term_code")
    }

    fn prev_enrollment(&self, classid: &str) -> Result<i64, StoreError> {
        let db = self.conn()?;
        let prev: Option<i64> = db
            .query_row(
                "SELECT prev_enrollment FROM sections WHERE classid = ?",
                [classid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(prev.unwrap_or(0))
    }

    fn set_prev_enrollment(&self, classid: &str, enrollment: i64) -> Result<(), StoreError> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE sections SET prev_enrollment = ?2 WHERE classid = ?1",
            params![classid, enrollment],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownClass {
                classid: classid.to_string(),
            });
        }
        Ok(())
    }

    fn user(&self, netid: &str) -> Result<Option<User>, StoreError> {
        let db = self.conn()?;
        db.query_row(
            "SELECT netid, email, phone, auto_resub FROM users WHERE netid = ?",
            [netid],
            |row| {
                Ok(User {
                    netid: row.get(0)?,
                    email: row.get(1)?,
                    phone: row.get(2)?,
                    auto_resub: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    fn notif_record(&self, netid: &str, classid: &str) -> Result<Option<NotifRecord>, StoreError> {
        let db = self.conn()?;
        db.query_row(
            "SELECT n_open_spots, last_notif, num_notifs FROM notifs WHERE netid = ?1 AND classid = ?2",
            (netid, classid),
            |row| {
                Ok(NotifRecord {
                    n_open_spots: row.get(0)?,
                    last_notif: row.get(1)?,
                    num_notifs: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    fn update_notifs_history(
        &self,
        notified: &[String],
        classid: &str,
        n_open_spots: u32,
        reserved_seats: bool,
        notified_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        if reserved_seats {
            for netid in notified {
                tx.execute(
                    "UPDATE notifs SET num_notifs = num_notifs + 1 WHERE netid = ?1 AND classid = ?2",
                    (netid, classid),
                )?;
            }
        } else {
            tx.execute(
                "UPDATE notifs SET n_open_spots = ?2 WHERE classid = ?1",
                params![classid, n_open_spots],
            )?;
            for netid in notified {
                tx.execute(
                    "UPDATE notifs SET last_notif = ?3, num_notifs = num_notifs + 1
                     WHERE netid = ?1 AND classid = ?2",
                    params![netid, classid, notified_at],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn append_user_log(&self, netid: &str, entry: &str) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO user_logs (netid, entry, created_at) VALUES (?1, ?2, ?3)",
            params![netid, entry, Utc::now()],
        )?;
        db.execute(
            "DELETE FROM user_logs WHERE netid = ?1 AND id NOT IN
                (SELECT id FROM user_logs WHERE netid = ?1 ORDER BY id DESC LIMIT ?2)",
            params![netid, self.limits.max_user_logs as i64],
        )?;
        Ok(())
    }

    fn add_admin_log(&self, message: &str) -> Result<(), StoreError> {
        info!("{message}");
        let db = self.conn()?;
        db.execute(
            "INSERT INTO admin_logs (message, created_at) VALUES (?1, ?2)",
            params![message, Utc::now()],
        )?;
        db.execute(
            "DELETE FROM admin_logs WHERE id NOT IN
                (SELECT id FROM admin_logs ORDER BY id DESC LIMIT ?1)",
            [self.limits.max_admin_logs as i64],
        )?;
        Ok(())
    }

    fn add_system_log(
        &self,
        kind: SystemLogKind,
        message: &str,
        netid: Option<&str>,
    ) -> Result<(), StoreError> {
        let db = self.conn()?;
        self.insert_system_log(&db, kind, message, netid)
    }

    fn add_stats_notif_log(&self, message: &str) -> Result<(), StoreError> {
        let db = self.conn()?;
        let newest: Option<String> = db
            .query_row(
                "SELECT message FROM stats_notif_logs ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if newest.as_deref() == Some(message) {
            return Ok(());
        }
        db.execute(
            "INSERT INTO stats_notif_logs (message, created_at) VALUES (?1, ?2)",
            params![message, Utc::now()],
        )?;
        db.execute(
            "DELETE FROM stats_notif_logs WHERE id NOT IN
                (SELECT id FROM stats_notif_logs ORDER BY id DESC LIMIT ?1)",
            [self.limits.max_stats_notif_logs as i64],
        )?;
        Ok(())
    }

    fn increment_notif_counter(&self, n: u64) -> Result<(), StoreError> {
        if n == 0 {
            return Ok(());
        }
        let db = self.conn()?;
        for key in ["stats_total_notifs", "stats_current_notifs"] {
            let value = self.get_counter(&db, key)? + n;
            self.set_admin(&db, key, &value.to_string())?;
        }
        Ok(())
    }

    fn maintenance_mode(&self) -> Result<bool, StoreError> {
        self.get_flag("maintenance", "true")
    }

    fn set_maintenance_mode(&self, on: bool) -> Result<(), StoreError> {
        let db = self.conn()?;
        self.set_admin(&db, "maintenance", if on { "true" } else { "false" })?;
        self.insert_system_log(
            &db,
            SystemLogKind::Cron,
            &format!("maintenance mode set to {}", if on { "on" } else { "off" }),
            None,
        )
    }

    fn notifs_active(&self) -> Result<bool, StoreError> {
        self.get_flag("notifs_status", "on")
    }

    fn set_notifs_active(&self, on: bool) -> Result<(), StoreError> {
        let db = self.conn()?;
        self.set_admin(&db, "notifs_status", if on { "on" } else { "off" })
    }

    fn trigger_enabled(&self) -> Result<bool, StoreError> {
        self.get_flag("trigger_enabled", "true")
    }

    fn set_trigger_enabled(&self, on: bool) -> Result<(), StoreError> {
        let db = self.conn()?;
        self.set_admin(&db, "trigger_enabled", if on { "true" } else { "false" })?;
        self.insert_system_log(
            &db,
            SystemLogKind::Cron,
            &format!(
                "notification trigger set to {}",
                if on { "enabled" } else { "disabled" }
            ),
            None,
        )
    }

    fn live_status(&self) -> Result<LiveStatus, StoreError> {
        let db = self.conn()?;
        let raw = self.get_admin(&db, "live_notifs_status")?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Malformed {
            key: "live_notifs_status".to_string(),
            message: e.to_string(),
        })
    }

    fn set_live_status(&self, status: &LiveStatus) -> Result<(), StoreError> {
        let db = self.conn()?;
        self.set_admin(&db, "live_notifs_status", &serde_json::to_string(status)?)
    }

    fn notifs_schedule(&self) -> Result<Vec<Window>, StoreError> {
        let db = self.conn()?;
        let raw = self.get_admin(&db, "notifs_schedule")?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Malformed {
            key: "notifs_schedule".to_string(),
            message: e.to_string(),
        })
    }

    fn set_notifs_schedule(&self, windows: &[Window]) -> Result<(), StoreError> {
        let db = self.conn()?;
        self.set_admin(&db, "notifs_schedule", &serde_json::to_string(windows)?)
    }
}
