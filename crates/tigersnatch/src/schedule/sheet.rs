/// Manually maintained windows read from a CSV sheet
use super::{fetch_text, local_to_utc, validate_windows, ScheduleSource, Window};
use crate::error::ScheduleError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use tracing::info;

const COLUMNS: [&str; 4] = ["start_date", "start_time", "end_date", "end_time"];
const DATETIME_FMT: &str = "%m/%d/%Y %I:%M %p";

/// Splits one CSV record. Quoted fields may contain commas, and `""`
/// inside quotes is a literal quote.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

fn parse_local(date: &str, time: &str, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    let text = format!("{date} {time}");
    let naive = NaiveDateTime::parse_from_str(&text, DATETIME_FMT).map_err(|e| {
        ScheduleError::Parse {
            message: format!("bad datetime `{text}`: {e}"),
        }
    })?;
    local_to_utc(naive, tz).ok_or_else(|| ScheduleError::Parse {
        message: format!("`{text}` does not exist in {tz}"),
    })
}

/// Parses the sheet, adds `start_offset` to each start and drops windows
/// that have already ended. Extra columns are ignored.
pub fn parse_sheet(
    csv: &str,
    tz: Tz,
    start_offset: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Window>, ScheduleError> {
    let mut lines = csv.lines().filter(|l| !l.trim().is_empty());
    let header = split_record(lines.next().ok_or_else(|| ScheduleError::Parse {
        message: "empty sheet".to_string(),
    })?);

    let mut positions = [0usize; 4];
    for (slot, column) in positions.iter_mut().zip(COLUMNS) {
        *slot = header
            .iter()
            .position(|h| *h == column)
            .ok_or_else(|| ScheduleError::Parse {
                message: format!("missing column `{column}`"),
            })?;
    }

    let mut windows = Vec::new();
    for (row, line) in lines.enumerate() {
        let fields = split_record(line);
        let field = |i: usize| {
            fields.get(positions[i]).map(String::as_str).ok_or_else(|| ScheduleError::Parse {
                message: format!("row {} is missing `{}`", row + 1, COLUMNS[i]),
            })
        };
        let start = parse_local(field(0)?, field(1)?, tz)? + start_offset;
        let end = parse_local(field(2)?, field(3)?, tz)?;
        if end > now {
            windows.push(Window::new(start, end));
        }
    }
    Ok(windows)
}

/// Schedule source reading a published CSV sheet.
pub struct SheetSource {
    client: Client,
    url: String,
    tz: Tz,
    start_offset: Duration,
}

impl SheetSource {
    pub fn new(client: Client, url: String, tz: Tz, start_offset: Duration) -> Self {
        Self {
            client,
            url,
            tz,
            start_offset,
        }
    }
}

#[async_trait]
impl ScheduleSource for SheetSource {
    async fn windows(&self, now: DateTime<Utc>) -> Result<Vec<Window>, ScheduleError> {
        let csv = fetch_text(&self.client, &self.url).await?;
        let windows = parse_sheet(&csv, self.tz, self.start_offset, now)?;
        validate_windows(&windows)?;
        info!(windows = windows.len(), url = %self.url, "Read notification windows from sheet");
        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_sheet() {
        let csv = "\"start_date\",\"start_time\",\"end_date\",\"end_time\",\"notes\"\n\
                   \"1/2/2030\",\"8:00 AM\",\"1/2/2030\",\"5:00 PM\",\"past\"\n\
                   \"9/2/2030\",\"6:30 AM\",\"9/13/2030\",\"5:00 PM\",\"\"\n";
        let tz = chrono_tz::America::New_York;
        let windows = parse_sheet(csv, tz, Duration::minutes(5), utc(2030, 8, 1, 0, 0)).unwrap();
        // 6:30 AM and 5:00 PM EDT
        assert_eq!(
            windows,
            vec![Window::new(utc(2030, 9, 2, 10, 35), utc(2030, 9, 13, 21, 0))]
        );
    }

    #[test]
    fn test_quoted_commas_keep_columns() {
        let csv = "notes,start_date,start_time,end_date,end_time\n\
                   \"add/drop, \"\"fall\"\"\",9/2/2030,6:30 AM,9/13/2030,5:00 PM\n";
        let windows = parse_sheet(csv, chrono_tz::UTC, Duration::zero(), utc(2030, 8, 1, 0, 0)).unwrap();
        assert_eq!(
            windows,
            vec![Window::new(utc(2030, 9, 2, 6, 30), utc(2030, 9, 13, 17, 0))]
        );
        assert_eq!(
            split_record("\"add/drop, \"\"fall\"\"\", x"),
            vec!["add/drop, \"fall\"", "x"]
        );
    }

    #[test]
    fn test_missing_column() {
        let csv = "start_date,start_time,end_date\n1/2/2030,8:00 AM,1/2/2030\n";
        let err = parse_sheet(csv, chrono_tz::UTC, Duration::zero(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Parse { message } if message.contains("end_time")));
    }

    #[test]
    fn test_bad_time() {
        let csv = "start_date,start_time,end_date,end_time\n1/2/2030,25:00 AM,1/2/2030,5:00 PM\n";
        assert!(parse_sheet(csv, chrono_tz::UTC, Duration::zero(), Utc::now()).is_err());
    }
}
