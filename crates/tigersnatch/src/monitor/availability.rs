/// New-slot arithmetic for a single section

/// Result of comparing fresh seat counts against the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub n_new_slots: u32,
    /// Baseline to persist, only set for reserved-seat courses
    pub next_prev_enrollment: Option<i64>,
}

/// Computes how many seats opened in a section.
///
/// Reserved-seat courses partition capacity into categories, so
/// `capacity - enrollment` overstates what a waiting user can take. For them
/// the count is the drop in enrollment since the previous check, and the
/// baseline always rolls forward. A section at capacity reports 0 even if
/// enrollment decreased since the last check.
pub fn available_slots(
    enrollment: i64,
    capacity: i64,
    reserved_seats: bool,
    prev_enrollment: i64,
) -> Availability {
    if reserved_seats {
        let diff = if enrollment < capacity {
            prev_enrollment - enrollment
        } else {
            0
        };
        return Availability {
            n_new_slots: clamp(diff),
            next_prev_enrollment: Some(enrollment),
        };
    }

    Availability {
        n_new_slots: clamp(capacity - enrollment),
        next_prev_enrollment: None,
    }
}

fn clamp(n: i64) -> u32 {
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}
