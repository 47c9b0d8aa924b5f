use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::models::file::FileListQuery;

const BYTES_PER_KB: i64 = 1024;

/// Parsed listing criteria. `None` means the criterion is not applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileFilter {
    pub file_type: Option<String>,
    /// Inclusive lower bound in bytes.
    pub min_size: Option<i64>,
    /// Inclusive upper bound in bytes.
    pub max_size: Option<i64>,
    pub uploaded_from: Option<DateTime<Utc>>,
    pub uploaded_until: Option<DateTime<Utc>>,
    pub name_prefix: Option<String>,
}

impl FileFilter {
    /// Build criteria from raw query text.
    ///
    /// Each parameter is parsed on its own; one that is empty or malformed is
    /// dropped and the others still apply. Calendar dates are expanded in
    /// `tz` to the first and last instant of the day.
    pub fn from_query(query: &FileListQuery, tz: FixedOffset) -> Self {
        Self {
            file_type: non_empty(query.file_type.as_deref()),
            min_size: query.min_size.as_deref().and_then(parse_kilobytes),
            max_size: query.max_size.as_deref().and_then(parse_kilobytes),
            uploaded_from: query
                .min_uploaded_at
                .as_deref()
                .and_then(parse_date)
                .and_then(|date| start_of_day(date, tz)),
            uploaded_until: query
                .max_uploaded_at
                .as_deref()
                .and_then(parse_date)
                .and_then(|date| end_of_day(date, tz)),
            name_prefix: non_empty(query.search.as_deref()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Kilobytes to bytes. Fractions are truncated toward zero.
fn parse_kilobytes(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let kb = match raw.parse::<i64>() {
        Ok(kb) => kb,
        Err(_) => {
            let kb = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
            kb.trunc() as i64
        }
    };
    kb.checked_mul(BYTES_PER_KB)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn start_of_day(date: NaiveDate, tz: FixedOffset) -> Option<DateTime<Utc>> {
    to_utc(date.and_hms_opt(0, 0, 0)?, tz)
}

fn end_of_day(date: NaiveDate, tz: FixedOffset) -> Option<DateTime<Utc>> {
    to_utc(date.and_hms_nano_opt(23, 59, 59, 999_999_999)?, tz)
}

fn to_utc(local: NaiveDateTime, tz: FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
