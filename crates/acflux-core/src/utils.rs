use crate::error::IngestError;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use csv::StringRecord;

/// Parse a timestamp into epoch seconds. Strings carrying an offset (RFC 3339) are taken
/// as is, naive ones are interpreted in `tz`.
pub fn parse_datetime(s: &str, tz: Tz) -> Result<i64, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%d-%m-%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
    ];

    for fmt in &formats {
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(s, fmt) {
            let dt_utc = match tz.from_local_datetime(&naive_dt) {
                LocalResult::Single(dt) => dt.with_timezone(&Utc),
                LocalResult::Ambiguous(dt1, _) => dt1.with_timezone(&Utc),
                LocalResult::None => {
                    return Err(format!(
                        "Impossible local time {}. Selected timezone ({}) is likely incorrect.",
                        naive_dt, tz
                    ));
                },
            };
            return Ok(dt_utc.timestamp());
        }
    }
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(secs);
    }
    Err(format!("Unrecognized datetime format: {}", s))
}

pub fn utc_from_ts(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// Position of `name` in a csv header, case-insensitive.
pub fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

pub fn require_column(headers: &StringRecord, name: &'static str) -> Result<usize, IngestError> {
    column_index(headers, name).ok_or(IngestError::MissingColumn(name))
}

/// Empty cells and the usual NaN spellings read as missing.
pub fn parse_optional_f64(
    record: &StringRecord,
    idx: Option<usize>,
    row: usize,
) -> Result<Option<f64>, IngestError> {
    let Some(raw) = idx.and_then(|i| record.get(i)).map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("na") {
        return Ok(None);
    }
    let value = raw
        .parse::<f64>()
        .map_err(|e| IngestError::Parse { row, reason: format!("'{raw}': {e}") })?;
    Ok(value.is_finite().then_some(value))
}

pub fn parse_field<T: std::str::FromStr>(
    record: &StringRecord,
    idx: usize,
    row: usize,
) -> Result<T, IngestError>
where
    T::Err: std::fmt::Display,
{
    let raw = record.get(idx).map(str::trim).unwrap_or_default();
    raw.parse::<T>().map_err(|e| IngestError::Parse { row, reason: format!("'{raw}': {e}") })
}
