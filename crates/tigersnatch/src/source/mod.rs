//! Live seat-occupancy sources.
//!
//! The detector only depends on [`EnrollmentSource`]; [`StudentAppClient`]
//! is the production implementation backed by the registrar's API.

mod student_app;

pub use student_app::{parse_seats_response, StudentAppClient, StudentAppConfig};

use crate::error::FetchError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Seat data for one section as reported upstream.
///
/// Counts are optional because the upstream may omit either one; the
/// detector decides whether an omission is tolerable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSeats {
    pub courseid: String,
    pub enrollment: Option<i64>,
    pub capacity: Option<i64>,
    pub status_is_open: bool,
}

#[async_trait]
pub trait EnrollmentSource: Send + Sync {
    /// Fetches seat data for `class_ids` within `course_ids`.
    ///
    /// Sections not in `class_ids` are filtered out; sections the upstream
    /// does not know about are simply absent from the result.
    async fn fetch_seats(
        &self,
        term: &str,
        course_ids: &[String],
        class_ids: &HashSet<String>,
    ) -> Result<HashMap<String, SectionSeats>, FetchError>;
}
