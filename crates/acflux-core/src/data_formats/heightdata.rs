use crate::db::fluxes::mark_height_updated;
use crate::error::{IngestError, QueryError};
use crate::utils::{parse_datetime, parse_field, require_column};

use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct HeightData {
    pub datetime: Vec<i64>,
    pub chamber_id: Vec<String>,
    pub height: Vec<f64>,
}

impl HeightData {
    pub fn push(&mut self, datetime: i64, chamber_id: &str, height: f64) {
        self.datetime.push(datetime);
        self.chamber_id.push(chamber_id.to_owned());
        self.height.push(height);
    }

    pub fn len(&self) -> usize {
        self.datetime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datetime.is_empty()
    }

    /// the most recent height of the chamber at or before the given timestamp
    pub fn get_nearest_previous_height(
        &self,
        target_datetime: i64,
        target_chamber_id: &str,
    ) -> Option<f64> {
        let mut nearest_index: Option<usize> = None;
        let mut smallest_time_diff = i64::MAX;

        for (i, (dt, chamber)) in self.datetime.iter().zip(&self.chamber_id).enumerate() {
            if chamber == target_chamber_id && *dt <= target_datetime {
                let time_diff = target_datetime - dt;
                if time_diff < smallest_time_diff {
                    smallest_time_diff = time_diff;
                    nearest_index = Some(i);
                }
            }
        }

        nearest_index.map(|i| self.height[i])
    }
}

/// Inserts the heights and flags every stored flux row they apply to as stale.
/// Returns (rows inserted, flux rows marked).
pub fn insert_height_data(
    conn: &Connection,
    height_data: &HeightData,
) -> Result<(usize, usize), QueryError> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO height (chamber_id, datetime, height)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chamber_id, datetime)
             DO UPDATE SET height = excluded.height",
        )?;

        for i in 0..height_data.len() {
            inserted += stmt.execute(params![
                &height_data.chamber_id[i],
                height_data.datetime[i],
                height_data.height[i],
            ])?;
        }
    }

    let mut marked = 0;
    for i in 0..height_data.len() {
        marked += mark_height_updated(
            &tx,
            &height_data.chamber_id[i],
            height_data.datetime[i],
            height_data.height[i],
        )?;
    }
    tx.commit()?;
    Ok((inserted, marked))
}

pub fn get_previous_height(
    conn: &Connection,
    chamber_id: &str,
    time: i64,
) -> Result<Option<f64>, QueryError> {
    let height = conn
        .query_row(
            "SELECT height
             FROM height
             WHERE chamber_id = ?1 AND datetime <= ?2
             ORDER BY datetime DESC
             LIMIT 1",
            params![chamber_id, time],
            |row| row.get::<_, f64>(0),
        )
        .optional()?;
    Ok(height)
}

/// Canonical height csv: `datetime`, `chamber_id`, `height` (m).
pub fn read_height_csv<P: AsRef<Path>>(file_path: P, tz: Tz) -> Result<HeightData, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(file_path)?;
    let headers = rdr.headers()?.clone();
    let dt_idx = require_column(&headers, "datetime")?;
    let chamber_idx = require_column(&headers, "chamber_id")?;
    let height_idx = require_column(&headers, "height")?;

    let mut heights = HeightData::default();
    for (i, result) in rdr.records().enumerate() {
        let row = i + 2;
        let record = result?;
        let datetime = parse_datetime(record.get(dt_idx).unwrap_or_default(), tz)
            .map_err(|reason| IngestError::Parse { row, reason })?;
        let chamber: String = parse_field(&record, chamber_idx, row)?;
        let height: f64 = parse_field(&record, height_idx, row)?;
        heights.push(datetime, &chamber, height);
    }
    Ok(heights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fluxes_schema::initiate_tables;

    fn heights() -> HeightData {
        let mut h = HeightData::default();
        h.push(100, "A", 0.5);
        h.push(200, "A", 0.6);
        h.push(150, "B", 0.9);
        h
    }

    #[test]
    fn previous_height_per_chamber() {
        let h = heights();
        assert_eq!(h.get_nearest_previous_height(199, "A"), Some(0.5));
        assert_eq!(h.get_nearest_previous_height(200, "A"), Some(0.6));
        assert_eq!(h.get_nearest_previous_height(10_000, "B"), Some(0.9));
        assert_eq!(h.get_nearest_previous_height(99, "A"), None);
        assert_eq!(h.get_nearest_previous_height(500, "C"), None);
    }

    #[test]
    fn db_lookup_matches_in_memory() {
        let conn = Connection::open_in_memory().unwrap();
        initiate_tables(&conn).unwrap();
        let h = heights();
        let (inserted, marked) = insert_height_data(&conn, &h).unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(marked, 0);

        for (t, c) in [(199, "A"), (200, "A"), (99, "A"), (300, "B")] {
            assert_eq!(get_previous_height(&conn, c, t).unwrap(), h.get_nearest_previous_height(t, c));
        }
    }
}
