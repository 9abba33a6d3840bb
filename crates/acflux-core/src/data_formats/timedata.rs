use crate::cycle::definition::CycleDefinition;
use crate::error::{DefinitionError, IngestError, QueryError};
use crate::traits::CycleDefinitionSource;
use crate::utils::{parse_datetime, parse_field, require_column, utc_from_ts};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection};
use std::path::Path;

/// Raw chamber schedule as read from a file, not yet validated.
#[derive(Debug, Default, Clone)]
pub struct TimeData {
    pub chamber_id: Vec<String>,
    pub start_time: Vec<i64>,
    pub close_offset: Vec<i64>,
    pub open_offset: Vec<i64>,
    pub end_offset: Vec<i64>,
}

impl TimeData {
    pub fn push(&mut self, chamber_id: &str, start_time: i64, close: i64, open: i64, end: i64) {
        self.chamber_id.push(chamber_id.to_owned());
        self.start_time.push(start_time);
        self.close_offset.push(close);
        self.open_offset.push(open);
        self.end_offset.push(end);
    }

    pub fn len(&self) -> usize {
        self.start_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start_time.is_empty()
    }

    /// Splits the schedule into consecutive pieces of at most `size` rows.
    pub fn chunk(&self, size: usize) -> Vec<TimeData> {
        let size = size.max(1);
        (0..self.len())
            .step_by(size)
            .map(|lo| {
                let hi = (lo + size).min(self.len());
                TimeData {
                    chamber_id: self.chamber_id[lo..hi].to_vec(),
                    start_time: self.start_time[lo..hi].to_vec(),
                    close_offset: self.close_offset[lo..hi].to_vec(),
                    open_offset: self.open_offset[lo..hi].to_vec(),
                    end_offset: self.end_offset[lo..hi].to_vec(),
                }
            })
            .collect()
    }

    /// Validated definition of row `i`.
    pub fn definition(&self, i: usize) -> Result<CycleDefinition, DefinitionError> {
        let start = utc_from_ts(self.start_time[i]).ok_or(DefinitionError::BadOffsets {
            close: self.close_offset[i],
            open: self.open_offset[i],
            end: self.end_offset[i],
        })?;
        CycleDefinition::new(
            self.chamber_id[i].clone(),
            start,
            self.close_offset[i],
            self.open_offset[i],
            self.end_offset[i],
        )
    }
}

/// Inserts every valid row, rows breaking the offset invariant are logged and skipped.
/// Returns (inserted, skipped).
pub fn insert_cycles(conn: &Connection, cycles: &TimeData) -> Result<(usize, usize), QueryError> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    let mut skipped = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO cycles (chamber_id, start_time, close_offset, open_offset, end_offset)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chamber_id, start_time) DO NOTHING",
        )?;
        for i in 0..cycles.len() {
            let def = match cycles.definition(i) {
                Ok(def) => def,
                Err(e) => {
                    tracing::warn!("skipping cycle {} at {}: {}", cycles.chamber_id[i], cycles.start_time[i], e);
                    skipped += 1;
                    continue;
                },
            };
            let n = stmt.execute(params![
                def.chamber_id(),
                def.start_ts(),
                def.close_offset(),
                def.open_offset(),
                def.end_offset(),
            ])?;
            inserted += n;
            skipped += 1 - n;
        }
    }
    tx.commit()?;
    Ok((inserted, skipped))
}

pub fn query_cycles(conn: &Connection, start: i64, end: i64) -> Result<Vec<CycleDefinition>, QueryError> {
    let mut stmt = conn.prepare(
        "SELECT chamber_id, start_time, close_offset, open_offset, end_offset
         FROM cycles
         WHERE start_time >= ?1 AND start_time < ?2
         ORDER BY start_time, chamber_id",
    )?;
    let rows = stmt.query_map(params![start, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut raw = TimeData::default();
    for row in rows {
        let (chamber, start_time, close, open, end) = row?;
        raw.push(&chamber, start_time, close, open, end);
    }
    let mut out = Vec::with_capacity(raw.len());
    for i in 0..raw.len() {
        out.push(raw.definition(i)?);
    }
    Ok(out)
}

impl CycleDefinitionSource for Connection {
    fn range_query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CycleDefinition>, QueryError> {
        query_cycles(self, start.timestamp(), end.timestamp())
    }
}

impl CycleDefinitionSource for Vec<CycleDefinition> {
    fn range_query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CycleDefinition>, QueryError> {
        let mut out: Vec<CycleDefinition> = self
            .iter()
            .filter(|d| d.start_time() >= start && d.start_time() < end)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.start_time().cmp(&b.start_time()).then_with(|| a.chamber_id().cmp(b.chamber_id()))
        });
        Ok(out)
    }
}

/// Canonical cycle csv: `chamber_id`, `start_time`, `close_offset`, `open_offset`,
/// `end_offset` (seconds).
pub fn read_cycle_csv<P: AsRef<Path>>(file_path: P, tz: Tz) -> Result<TimeData, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(file_path)?;
    let headers = rdr.headers()?.clone();
    let chamber_idx = require_column(&headers, "chamber_id")?;
    let start_idx = require_column(&headers, "start_time")?;
    let close_idx = require_column(&headers, "close_offset")?;
    let open_idx = require_column(&headers, "open_offset")?;
    let end_idx = require_column(&headers, "end_offset")?;

    let mut times = TimeData::default();
    for (i, result) in rdr.records().enumerate() {
        let row = i + 2;
        let record = result?;
        let chamber: String = parse_field(&record, chamber_idx, row)?;
        let start = parse_datetime(record.get(start_idx).unwrap_or_default(), tz)
            .map_err(|reason| IngestError::Parse { row, reason })?;
        times.push(
            &chamber,
            start,
            parse_field(&record, close_idx, row)?,
            parse_field(&record, open_idx, row)?,
            parse_field(&record, end_idx, row)?,
        );
    }
    Ok(times)
}
