//! Per-recipient eligibility and throttling.
//!
//! [`decide`] is the pure rule for one (user, section) pair. [`Throttle`]
//! applies it to a whole waitlist and then commits the resulting history
//! updates and waitlist removals before anything is sent.

use crate::db::{ClassInfo, NotifRecord, Store, User};
use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

/// Limits applied to auto-resubscribed users.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    pub max_auto_resub_notifs: u32,
    pub min_notifs_delay: Duration,
    /// Maximum random shift applied to `last_notif`, either direction
    pub jitter: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_auto_resub_notifs: 5,
            min_notifs_delay: Duration::minutes(60),
            jitter: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Send a notification; `unsubscribe` removes the user afterwards
    Notify { unsubscribe: bool },
    /// Remove from the waitlist without notifying (cap reached)
    Drop,
    /// Nothing new to tell this user yet
    Suppress,
}

/// Decides what happens to one waiting user this cycle.
pub fn decide(
    user: &User,
    record: &NotifRecord,
    n_new_slots: u32,
    reserved_seats: bool,
    now: DateTime<Utc>,
    policy: &ThrottlePolicy,
) -> Decision {
    if !user.auto_resub {
        return Decision::Notify { unsubscribe: true };
    }
    if record.num_notifs >= policy.max_auto_resub_notifs {
        return Decision::Drop;
    }
    if reserved_seats {
        return Decision::Notify { unsubscribe: false };
    }

    let count_changed = n_new_slots != record.n_open_spots;
    let delay_elapsed = now - record.last_notif >= policy.min_notifs_delay;
    if count_changed || delay_elapsed {
        Decision::Notify { unsubscribe: false }
    } else {
        Decision::Suppress
    }
}

/// A user selected for notification.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub user: User,
    /// Whether the user is removed from the waitlist by this notification
    pub unsubscribed: bool,
}

/// Eligibility outcome for one section.
#[derive(Debug, Clone)]
pub struct SectionPlan {
    pub info: ClassInfo,
    pub n_new_slots: u32,
    pub reserved_seats: bool,
    pub recipients: Vec<Recipient>,
    /// netids removed without a notification
    pub dropped: Vec<String>,
    pub suppressed: usize,
    /// Per-recipient failures (missing user or record)
    pub skipped: usize,
}

impl SectionPlan {
    pub fn classid(&self) -> &str {
        &self.info.classid
    }
}

pub struct Throttle {
    store: Arc<dyn Store>,
    policy: ThrottlePolicy,
}

impl Throttle {
    pub fn new(store: Arc<dyn Store>, policy: ThrottlePolicy) -> Self {
        Self { store, policy }
    }

    /// Evaluates every waiter of `classid`. Reads only.
    pub fn plan_section(
        &self,
        classid: &str,
        n_new_slots: u32,
        now: DateTime<Utc>,
    ) -> Result<SectionPlan, StoreError> {
        let info = self.store.class_info(classid)?;
        let reserved_seats = self.store.has_reserved_seats(&info.courseid)?;
        let mut plan = SectionPlan {
            info,
            n_new_slots,
            reserved_seats,
            recipients: Vec::new(),
            dropped: Vec::new(),
            suppressed: 0,
            skipped: 0,
        };

        for netid in self.store.class_waitlist(classid)? {
            let (user, record) = match (
                self.store.user(&netid)?,
                self.store.notif_record(&netid, classid)?,
            ) {
                (Some(user), Some(record)) => (user, record),
                (user, _) => {
                    let missing = if user.is_none() { "user" } else { "notif record" };
                    warn!(netid = %netid, classid, missing, "Skipping waiter");
                    plan.skipped += 1;
                    continue;
                }
            };

            match decide(&user, &record, n_new_slots, reserved_seats, now, &self.policy) {
                Decision::Notify { unsubscribe } => plan.recipients.push(Recipient {
                    user,
                    unsubscribed: unsubscribe,
                }),
                Decision::Drop => plan.dropped.push(netid),
                Decision::Suppress => plan.suppressed += 1,
            }
        }

        debug!(
            classid,
            n_new_slots,
            recipients = plan.recipients.len(),
            dropped = plan.dropped.len(),
            suppressed = plan.suppressed,
            "Planned section"
        );
        Ok(plan)
    }

    /// Applies a plan: history first, then removals and user logs.
    ///
    /// Recipients who already left the waitlist are removed from the plan
    /// and counted as skipped; the remaining recipients are safe to message.
    /// A failed user log write keeps the recipient.
    pub fn commit(&self, plan: &mut SectionPlan, now: DateTime<Utc>) -> Result<(), StoreError> {
        let classid = plan.info.classid.clone();
        let notified: Vec<String> = plan
            .recipients
            .iter()
            .map(|r| r.user.netid.clone())
            .collect();

        self.store.update_notifs_history(
            &notified,
            &classid,
            plan.n_new_slots,
            plan.reserved_seats,
            self.jittered(now),
        )?;

        for netid in &plan.dropped {
            if let Err(e) = self.store.remove_from_waitlist(netid, &classid) {
                if !e.is_recipient_gone() {
                    return Err(e);
                }
                plan.skipped += 1;
            }
        }

        let log_entry = format!(
            "{} spots available in {}",
            plan.n_new_slots,
            plan.info.short_name()
        );
        let mut kept = Vec::with_capacity(plan.recipients.len());
        for recipient in plan.recipients.drain(..) {
            let netid = &recipient.user.netid;
            if recipient.unsubscribed {
                if let Err(e) = self.store.remove_from_waitlist(netid, &classid) {
                    if !e.is_recipient_gone() {
                        return Err(e);
                    }
                    warn!(netid = %netid, classid = %classid, "Recipient left the waitlist mid-cycle");
                    plan.skipped += 1;
                    continue;
                }
            }
            if let Err(e) = self.store.append_user_log(netid, &log_entry) {
                warn!(netid = %netid, classid = %classid, error = %e, "Failed to append user log");
            }
            kept.push(recipient);
        }
        plan.recipients = kept;
        Ok(())
    }

    /// Records that a section currently has no open slots, so that a later
    /// reopening with the same count alerts again.
    pub fn record_no_openings(&self, classid: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let info = self.store.class_info(classid)?;
        let reserved = self.store.has_reserved_seats(&info.courseid)?;
        self.store
            .update_notifs_history(&[], classid, 0, reserved, now)
    }

    fn jittered(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let spread = self.policy.jitter.num_seconds();
        if spread <= 0 {
            return now;
        }
        now + Duration::seconds(rand::thread_rng().gen_range(-spread..=spread))
    }
}
