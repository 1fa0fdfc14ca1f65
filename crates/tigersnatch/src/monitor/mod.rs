//! Enrollment change detection.
//!
//! Each cycle the [`Monitor`] collects every waited-on section, fetches
//! fresh seat counts per course batch and turns them into new-slot counts.
//! Results live in a [`CycleContext`] so that every consumer within one
//! cycle sees the same numbers without refetching.

mod availability;

pub use availability::{available_slots, Availability};

use crate::db::{Store, SystemLogKind};
use crate::error::MonitorError;
use crate::source::{EnrollmentSource, SectionSeats};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// New-slot counts for one cycle.
#[derive(Debug, Default)]
pub struct CycleEnrollments {
    /// classid -> number of newly available slots
    pub new_slots: BTreeMap<String, u32>,
    pub courses_examined: usize,
    /// Batches whose fetch or validation failed; their baselines are untouched
    pub batch_errors: Vec<MonitorError>,
}

pub struct Monitor {
    store: Arc<dyn Store>,
    source: Arc<dyn EnrollmentSource>,
    batch_size: usize,
    fetch_workers: usize,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn EnrollmentSource>,
        batch_size: usize,
        fetch_workers: usize,
    ) -> Self {
        Self {
            store,
            source,
            batch_size: batch_size.max(1),
            fetch_workers: fetch_workers.max(1),
        }
    }

    /// Starts a new cycle with an empty result cache.
    pub fn begin_cycle(&self) -> CycleContext<'_> {
        CycleContext {
            monitor: self,
            result: OnceCell::new(),
        }
    }

    async fn compute(&self) -> Result<CycleEnrollments, MonitorError> {
        let start = Instant::now();
        let term = self.store.current_term_code()?;
        let disabled = self.store.disabled_courses()?;

        // courseid -> waited classids
        let mut by_course: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for section in self.store.waited_sections()? {
            if disabled.contains(&section.courseid) {
                debug!(courseid = %section.courseid, "Skipping disabled course");
                continue;
            }
            by_course
                .entry(section.courseid)
                .or_default()
                .push(section.classid);
        }

        let course_ids: Vec<String> = by_course.keys().cloned().collect();
        let batches: Vec<(Vec<String>, HashSet<String>)> = course_ids
            .chunks(self.batch_size)
            .map(|chunk| {
                let classes = chunk
                    .iter()
                    .flat_map(|c| by_course[c].iter().cloned())
                    .collect();
                (chunk.to_vec(), classes)
            })
            .collect();

        let mut result = CycleEnrollments {
            courses_examined: course_ids.len(),
            ..CycleEnrollments::default()
        };

        let fetched: Vec<_> = stream::iter(batches)
            .map(|(courses, classes)| {
                let term = term.clone();
                async move {
                    let seats = self.source.fetch_seats(&term, &courses, &classes).await;
                    (courses, classes, seats)
                }
            })
            .buffered(self.fetch_workers)
            .collect()
            .await;

        for (courses, classes, seats) in fetched {
            let outcome = match seats {
                Ok(seats) => self.apply_batch(&courses, &classes, seats),
                Err(e) => Err(MonitorError::from(e)),
            };
            match outcome {
                Ok(slots) => result.new_slots.extend(slots),
                Err(e) => {
                    error!(courses = ?courses, error = %e, "Seat batch failed, baselines untouched");
                    let message = format!("seat batch failed ({}): {e}", courses.join(", "));
                    if let Err(log_err) =
                        self.store
                            .add_system_log(SystemLogKind::Monitor, &message, None)
                    {
                        warn!(error = %log_err, "Failed to record batch failure");
                    }
                    result.batch_errors.push(e);
                }
            }
        }

        info!(
            courses = result.courses_examined,
            sections = result.new_slots.len(),
            failed_batches = result.batch_errors.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Computed enrollment changes"
        );
        Ok(result)
    }

    /// Turns one batch of seat data into slot counts and baseline writes.
    ///
    /// The whole batch is validated before any baseline is written.
    fn apply_batch(
        &self,
        courses: &[String],
        classes: &HashSet<String>,
        seats: HashMap<String, SectionSeats>,
    ) -> Result<Vec<(String, u32)>, MonitorError> {
        let courses: HashSet<&String> = courses.iter().collect();
        let mut relevant: Vec<(String, SectionSeats)> = seats
            .into_iter()
            .filter(|(classid, s)| classes.contains(classid) && courses.contains(&s.courseid))
            .collect();
        relevant.sort_by(|a, b| a.0.cmp(&b.0));

        for (classid, s) in &relevant {
            if s.status_is_open && s.enrollment.is_some() && s.capacity.is_none() {
                return Err(MonitorError::MissingSectionData {
                    classid: classid.clone(),
                });
            }
        }

        let mut reserved: HashMap<String, bool> = HashMap::new();
        let mut slots = Vec::with_capacity(relevant.len());

        for (classid, s) in relevant {
            let has_reserved = match reserved.get(&s.courseid) {
                Some(r) => *r,
                None => {
                    let r = self.store.has_reserved_seats(&s.courseid)?;
                    reserved.insert(s.courseid.clone(), r);
                    r
                }
            };

            if !s.status_is_open {
                // a reopened reserved section should report its real count
                if let (true, Some(capacity)) = (has_reserved, s.capacity) {
                    self.store.set_prev_enrollment(&classid, capacity)?;
                }
                continue;
            }

            let (Some(enrollment), Some(capacity)) = (s.enrollment, s.capacity) else {
                continue;
            };
            let prev = if has_reserved {
                self.store.prev_enrollment(&classid)?
            } else {
                0
            };

            let availability = available_slots(enrollment, capacity, has_reserved, prev);
            if let Some(next) = availability.next_prev_enrollment {
                self.store.set_prev_enrollment(&classid, next)?;
            }
            slots.push((classid, availability.n_new_slots));
        }

        Ok(slots)
    }
}

/// Cycle-scoped view of the detector. The first call to
/// [`changed_enrollments`](Self::changed_enrollments) fetches; later calls
/// return the cached result.
pub struct CycleContext<'a> {
    monitor: &'a Monitor,
    result: OnceCell<CycleEnrollments>,
}

impl CycleContext<'_> {
    pub async fn changed_enrollments(&self) -> Result<&CycleEnrollments, MonitorError> {
        self.result
            .get_or_try_init(|| self.monitor.compute())
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSource;
    use super::*;
    use crate::db::testing::seeded_store;
    use crate::db::{DbCourse, SqliteStore};

    fn monitor(store: Arc<SqliteStore>, source: Arc<FakeSource>) -> Monitor {
        Monitor::new(store, source, 20, 2)
    }

    #[tokio::test]
    async fn test_non_reserved_section() {
        let store = Arc::new(seeded_store(false, &[("alice", false)]));
        let source = Arc::new(FakeSource::with_section("40268", "002054", 7, 10));
        let monitor = monitor(store, source);

        let ctx = monitor.begin_cycle();
        let result = ctx.changed_enrollments().await.unwrap();
        assert_eq!(result.new_slots.get("40268"), Some(&3));
        assert_eq!(result.courses_examined, 1);
    }

    #[tokio::test]
    async fn test_reserved_section_updates_baseline() {
        let store = Arc::new(seeded_store(true, &[("alice", false)]));
        store.set_prev_enrollment("40268", 5).unwrap();
        let source = Arc::new(FakeSource::with_section("40268", "002054", 3, 10));
        let monitor = monitor(store.clone(), source);

        let ctx = monitor.begin_cycle();
        assert_eq!(ctx.changed_enrollments().await.unwrap().new_slots["40268"], 2);
        assert_eq!(store.prev_enrollment("40268").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reserved_at_capacity_is_zero() {
        let store = Arc::new(seeded_store(true, &[("alice", false)]));
        store.set_prev_enrollment("40268", 12).unwrap();
        let source = Arc::new(FakeSource::with_section("40268", "002054", 10, 10));
        let monitor = monitor(store.clone(), source);

        let ctx = monitor.begin_cycle();
        assert_eq!(ctx.changed_enrollments().await.unwrap().new_slots["40268"], 0);
        assert_eq!(store.prev_enrollment("40268").unwrap(), 10);
    }

    #[tokio::test]
    async fn test_closed_reserved_section_resets_baseline_to_capacity() {
        let store = Arc::new(seeded_store(true, &[("alice", false)]));
        let source = Arc::new(FakeSource::default());
        source.set("40268", "002054", Some(10), Some(10), false);
        let monitor = monitor(store.clone(), source);

        let ctx = monitor.begin_cycle();
        assert!(ctx.changed_enrollments().await.unwrap().new_slots.is_empty());
        assert_eq!(store.prev_enrollment("40268").unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_capacity_fails_batch_without_writes() {
        let store = Arc::new(seeded_store(true, &[("alice", false)]));
        store.set_prev_enrollment("40268", 5).unwrap();
        let source = Arc::new(FakeSource::default());
        source.set("40268", "002054", Some(3), None, true);
        let monitor = monitor(store.clone(), source);

        let ctx = monitor.begin_cycle();
        let result = ctx.changed_enrollments().await.unwrap();
        assert!(result.new_slots.is_empty());
        assert!(matches!(
            result.batch_errors.as_slice(),
            [MonitorError::MissingSectionData { classid }] if classid == "40268"
        ));
        assert_eq!(store.prev_enrollment("40268").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_baselines() {
        let store = Arc::new(seeded_store(true, &[("alice", false)]));
        store.set_prev_enrollment("40268", 5).unwrap();
        let source = Arc::new(FakeSource::with_section("40268", "002054", 3, 10));
        *source.fail.lock().unwrap() = true;
        let monitor = monitor(store.clone(), source);

        let ctx = monitor.begin_cycle();
        let result = ctx.changed_enrollments().await.unwrap();
        assert!(matches!(result.batch_errors.as_slice(), [MonitorError::Fetch(_)]));
        assert_eq!(store.prev_enrollment("40268").unwrap(), 5);

        let logs = store.system_logs(SystemLogKind::Monitor).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].message.starts_with("seat batch failed (002054)"));
    }

    #[tokio::test]
    async fn test_result_is_memoized_per_cycle() {
        let store = Arc::new(seeded_store(false, &[("alice", false)]));
        let source = Arc::new(FakeSource::with_section("40268", "002054", 9, 10));
        let monitor = monitor(store, source.clone());

        let ctx = monitor.begin_cycle();
        let first = ctx.changed_enrollments().await.unwrap() as *const CycleEnrollments;
        let second = ctx.changed_enrollments().await.unwrap() as *const CycleEnrollments;
        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);

        // a new cycle fetches again
        let ctx = monitor.begin_cycle();
        ctx.changed_enrollments().await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_course_is_skipped() {
        let store = Arc::new(seeded_store(false, &[("alice", false)]));
        store
            .upsert_course(&DbCourse {
                courseid: "002054".into(),
                displayname: "COS126".into(),
                title: "Computer Science: An Interdisciplinary Approach".into(),
                has_reserved_seats: false,
                disabled: true,
            })
            .unwrap();
        let source = Arc::new(FakeSource::with_section("40268", "002054", 7, 10));
        let monitor = monitor(store, source.clone());

        let ctx = monitor.begin_cycle();
        let result = ctx.changed_enrollments().await.unwrap();
        assert!(result.new_slots.is_empty());
        assert_eq!(result.courses_examined, 0);
        assert_eq!(source.calls(), 0);
    }
}
