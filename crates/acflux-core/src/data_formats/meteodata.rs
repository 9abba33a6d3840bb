use crate::constants::METEO_TOLERANCE_S;
use crate::error::{IngestError, QueryError};
use crate::utils::{column_index, parse_datetime, parse_field, require_column};

use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct MeteoData {
    pub datetime: Vec<i64>,
    pub source: Vec<String>,
    pub temperature: Vec<f64>,
    pub pressure: Vec<f64>,
}

impl MeteoData {
    pub fn push(&mut self, datetime: i64, source: &str, temperature: f64, pressure: f64) {
        self.datetime.push(datetime);
        self.source.push(source.to_owned());
        self.temperature.push(temperature);
        self.pressure.push(pressure);
    }

    pub fn len(&self) -> usize {
        self.datetime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datetime.is_empty()
    }

    /// Nearest (temperature, pressure) within 30 minutes of `target_timestamp`. Rows
    /// must be sorted by datetime. Ties go to the earlier row.
    pub fn get_nearest(&self, target_timestamp: i64, source: Option<&str>) -> Option<(f64, f64)> {
        let matches = |i: usize| source.map_or(true, |s| self.source[i] == s);
        let split = self.datetime.partition_point(|&t| t < target_timestamp);

        let prev = (0..split)
            .rev()
            .take_while(|&i| target_timestamp - self.datetime[i] <= METEO_TOLERANCE_S)
            .find(|&i| matches(i));
        let next = (split..self.datetime.len())
            .take_while(|&i| self.datetime[i] - target_timestamp <= METEO_TOLERANCE_S)
            .find(|&i| matches(i));

        let nearest = match (prev, next) {
            (Some(p), Some(n)) => {
                let prev_diff = target_timestamp - self.datetime[p];
                let next_diff = self.datetime[n] - target_timestamp;
                if prev_diff <= next_diff {
                    p
                } else {
                    n
                }
            },
            (Some(p), None) => p,
            (None, Some(n)) => n,
            (None, None) => return None,
        };
        Some((self.temperature[nearest], self.pressure[nearest]))
    }
}

pub fn insert_meteo_data(conn: &Connection, meteo_data: &MeteoData) -> Result<usize, QueryError> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO meteo (datetime, source, air_temperature, air_pressure)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, datetime)
             DO UPDATE SET air_temperature = excluded.air_temperature,
                           air_pressure = excluded.air_pressure",
        )?;

        for i in 0..meteo_data.len() {
            inserted += stmt.execute(params![
                meteo_data.datetime[i],
                meteo_data.source[i],
                meteo_data.temperature[i],
                meteo_data.pressure[i]
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

pub fn get_nearest_meteo(
    conn: &Connection,
    time: i64,
    source: Option<&str>,
) -> Result<Option<(f64, f64)>, QueryError> {
    let mut stmt = conn.prepare(
        "SELECT air_temperature, air_pressure
         FROM meteo
         WHERE datetime BETWEEN ?1 - ?3 AND ?1 + ?3
           AND (?2 IS NULL OR source = ?2)
         ORDER BY ABS(datetime - ?1), datetime
         LIMIT 1",
    )?;
    let result = stmt
        .query_row(params![time, source, METEO_TOLERANCE_S], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?))
        })
        .optional()?;
    Ok(result)
}

/// Canonical meteo csv: `datetime`, `air_temperature` (°C), `air_pressure` (hPa) and an
/// optional `source` column. Rows without a source get `default_source`.
pub fn read_meteo_csv<P: AsRef<Path>>(
    file_path: P,
    tz: Tz,
    default_source: &str,
) -> Result<MeteoData, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(file_path)?;
    let headers = rdr.headers()?.clone();
    let dt_idx = require_column(&headers, "datetime")?;
    let temp_idx = require_column(&headers, "air_temperature")?;
    let press_idx = require_column(&headers, "air_pressure")?;
    let source_idx = column_index(&headers, "source");

    let mut meteos = MeteoData::default();
    for (i, result) in rdr.records().enumerate() {
        let row = i + 2;
        let record = result?;
        let datetime = parse_datetime(record.get(dt_idx).unwrap_or_default(), tz)
            .map_err(|reason| IngestError::Parse { row, reason })?;
        let temp: f64 = parse_field(&record, temp_idx, row)?;
        let press: f64 = parse_field(&record, press_idx, row)?;
        let source = source_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default_source);

        meteos.push(datetime, source, temp, press);
    }
    Ok(meteos)
}
