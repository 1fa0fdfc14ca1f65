//! Notification windows derived from the registrar's iCalendar feed.
//!
//! Only `VEVENT` titles and start/end dates matter here, so the feed is
//! read with a small line-oriented parser rather than a full RFC 5545
//! implementation.

use super::{fetch_text, local_to_utc, validate_windows, ScheduleSource, Window};
use crate::config::CalendarConfig;
use crate::error::ScheduleError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use tracing::{debug, info};

/// Title and date span of one calendar event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub summary: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Default)]
struct PartialEvent {
    summary: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

/// Joins folded continuation lines (lines starting with a space or tab).
fn unfold(ics: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in ics.lines() {
        let line = raw.trim_end_matches('\r');
        if let (Some(rest), Some(last)) = (line.strip_prefix([' ', '\t']), lines.last_mut()) {
            last.push_str(rest);
            continue;
        }
        lines.push(line.to_string());
    }
    lines
}

fn unescape(text: &str) -> String {
    text.replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

/// Reads the date part of a DTSTART/DTEND value (`20300902` or `20300902T133000Z`).
fn parse_date(value: &str) -> Result<NaiveDate, ScheduleError> {
    let digits = value.get(..8).unwrap_or(value);
    NaiveDate::parse_from_str(digits, "%Y%m%d").map_err(|e| ScheduleError::Parse {
        message: format!("bad event date `{value}`: {e}"),
    })
}

/// Extracts every complete `VEVENT`, sorted by start date.
pub fn parse_events(ics: &str) -> Result<Vec<CalendarEvent>, ScheduleError> {
    let mut events = Vec::new();
    let mut current: Option<PartialEvent> = None;

    for line in unfold(ics) {
        if line == "BEGIN:VEVENT" {
            current = Some(PartialEvent::default());
            continue;
        }
        if line == "END:VEVENT" {
            if let Some(PartialEvent {
                summary: Some(summary),
                start: Some(start),
                end,
            }) = current.take()
            {
                events.push(CalendarEvent {
                    summary,
                    start,
                    end: end.unwrap_or(start),
                });
            }
            continue;
        }
        let Some(event) = current.as_mut() else {
            continue;
        };
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.split(';').next().unwrap_or(name) {
            "SUMMARY" => event.summary = Some(unescape(value)),
            "DTSTART" => event.start = Some(parse_date(value)?),
            "DTEND" => event.end = Some(parse_date(value)?),
            _ => {}
        }
    }

    events.sort_by_key(|e| e.start);
    Ok(events)
}

/// `minutes` past local midnight on `date`, as wall-clock time.
fn local_time(date: NaiveDate, minutes: i64, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN) + Duration::minutes(minutes);
    local_to_utc(naive, tz).unwrap_or_else(|| naive.and_utc())
}

fn matches_any(title: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| title.contains(&k.to_lowercase()))
}

/// Turns calendar events into notification windows.
///
/// A settle-in event (e.g. add/drop begins) opens a window that runs until
/// the next retained event's date; a single-day event (e.g. course
/// selection) yields a window on its own date. `start_offset` is added to
/// every window start.
pub fn derive_windows(
    events: &[CalendarEvent],
    config: &CalendarConfig,
    tz: Tz,
    start_offset: Duration,
    now: DateTime<Utc>,
) -> Vec<Window> {
    let retained: Vec<(String, NaiveDate)> = events
        .iter()
        .filter_map(|event| {
            let title = event.summary.to_lowercase();
            let included = matches_any(&title, &config.settle_keywords)
                || matches_any(&title, &config.single_day_keywords);
            if !included || matches_any(&title, &config.exclude_keywords) {
                return None;
            }
            if now > local_time(event.end, 0, tz) {
                return None;
            }
            if (event.end - event.start).num_days() > 1 {
                debug!(summary = %event.summary, "Ignoring multi-day event");
                return None;
            }
            Some((title, event.start))
        })
        .collect();

    let mut windows = Vec::new();
    let mut i = 0;
    while i < retained.len() {
        let (title, date) = &retained[i];
        let (start, end) = if matches_any(title, &config.settle_keywords) {
            let Some((_, closing)) = retained.get(i + 1) else {
                break;
            };
            i += 1;
            (
                local_time(*date, config.settle_start_mins, tz),
                local_time(*closing, config.settle_end_mins, tz),
            )
        } else {
            (
                local_time(*date, config.single_day_start_mins, tz),
                local_time(*date, config.single_day_end_mins, tz),
            )
        };
        windows.push(Window::new(start + start_offset, end));
        i += 1;
    }
    windows
}

/// Schedule source reading the registrar's iCalendar feed.
pub struct CalendarSource {
    client: Client,
    config: CalendarConfig,
    tz: Tz,
    start_offset: Duration,
}

impl CalendarSource {
    pub fn new(
        client: Client,
        config: CalendarConfig,
        tz: Tz,
        start_offset: Duration,
    ) -> Self {
        Self {
            client,
            config,
            tz,
            start_offset,
        }
    }
}

#[async_trait]
impl ScheduleSource for CalendarSource {
    async fn windows(&self, now: DateTime<Utc>) -> Result<Vec<Window>, ScheduleError> {
        let ics = fetch_text(&self.client, &self.config.ical_url).await?;
        let events = parse_events(&ics)?;
        let windows = derive_windows(&events, &self.config, self.tz, self.start_offset, now);
        validate_windows(&windows)?;
        info!(
            events = events.len(),
            windows = windows.len(),
            "Derived notification windows from calendar"
        );
        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
BEGIN:VEVENT\r
SUMMARY:Spring Course Selection\r
DTSTART;VALUE=DATE:20301110\r
DTEND;VALUE=DATE:20301111\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:Fall Term Add/Drop Period\r
  Begins\r
DTSTART;VALUE=DATE:20300902\r
DTEND;VALUE=DATE:20300903\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:Add/Drop Period Ends\r
DTSTART;VALUE=DATE:20300913\r
DTEND;VALUE=DATE:20300914\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:Graduate Student Add/Drop Deadline\r
DTSTART;VALUE=DATE:20300920\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:Fall Recess\r
DTSTART;VALUE=DATE:20301019\r
DTEND;VALUE=DATE:20301027\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:Course Selection Week\r
DTSTART;VALUE=DATE:20301201\r
DTEND;VALUE=DATE:20301206\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:Spring Course Selection\r
DTSTART:20290410T130000Z\r
END:VEVENT\r
END:VCALENDAR\r
";

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_unfolds_and_sorts() {
        let events = parse_events(FEED).unwrap();
        assert_eq!(events.len(), 7);
        assert_eq!(events[0].start, NaiveDate::from_ymd_opt(2029, 4, 10).unwrap());
        assert!(events
            .iter()
            .any(|e| e.summary == "Fall Term Add/Drop Period Begins"));
    }

    #[test]
    fn test_derive_windows() {
        let events = parse_events(FEED).unwrap();
        let windows = derive_windows(
            &events,
            &CalendarConfig::default(),
            chrono_tz::America::New_York,
            Duration::minutes(5),
            utc(2030, 8, 1, 0, 0),
        );

        assert_eq!(
            windows,
            vec![
                // add/drop begins 6:35 AM EDT, closes at the next event 5:00 PM EDT
                Window::new(utc(2030, 9, 2, 10, 35), utc(2030, 9, 13, 21, 0)),
                // course selection 7:35 AM to 11:59 PM EST
                Window::new(utc(2030, 11, 10, 12, 35), utc(2030, 11, 11, 4, 59)),
            ]
        );
        assert!(validate_windows(&windows).is_ok());
    }

    #[test]
    fn test_trailing_settle_event_is_dropped() {
        let events = vec![CalendarEvent {
            summary: "Add/Drop Period Begins".into(),
            start: NaiveDate::from_ymd_opt(2030, 9, 2).unwrap(),
            end: NaiveDate::from_ymd_opt(2030, 9, 3).unwrap(),
        }];
        let windows = derive_windows(
            &events,
            &CalendarConfig::default(),
            chrono_tz::UTC,
            Duration::zero(),
            utc(2030, 8, 1, 0, 0),
        );
        assert!(windows.is_empty());
    }

    #[test]
    fn test_bad_date_is_parse_error() {
        let feed = "BEGIN:VEVENT\nSUMMARY:x\nDTSTART:garbage\nEND:VEVENT\n";
        assert!(matches!(parse_events(feed), Err(ScheduleError::Parse { .. })));
    }
}
