use crate::error::{IngestError, QueryError};
use crate::gastype::GasType;
use crate::traits::TimeSeriesProvider;
use crate::types::FastMap;
use crate::utils::{column_index, parse_datetime, parse_optional_f64, require_column};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection};
use std::ops::Range;
use std::path::Path;

/// One analyzer reading. Gases the instrument doesn't measure stay None.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GasSample {
    pub datetime: i64,
    pub ch4: Option<f64>,
    pub co2: Option<f64>,
    pub n2o: Option<f64>,
    pub h2o: Option<f64>,
    pub diag: i64,
}

impl GasSample {
    pub fn new(datetime: i64) -> Self {
        Self { datetime, ..Default::default() }
    }

    pub fn value(&self, gas: GasType) -> Option<f64> {
        match gas {
            GasType::CH4 => self.ch4,
            GasType::CO2 => self.co2,
            GasType::N2O => self.n2o,
            GasType::H2O => self.h2o,
        }
    }

    pub fn with_value(mut self, gas: GasType, value: Option<f64>) -> Self {
        let slot = match gas {
            GasType::CH4 => &mut self.ch4,
            GasType::CO2 => &mut self.co2,
            GasType::N2O => &mut self.n2o,
            GasType::H2O => &mut self.h2o,
        };
        *slot = value.filter(|v| v.is_finite());
        self
    }

    pub fn with_diag(mut self, diag: i64) -> Self {
        self.diag = diag;
        self
    }
}

/// Columnar samples of a single instrument, ordered by time. Built only through
/// [`GasData::from_samples`] so every column has one entry per timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GasData {
    datetime: Vec<i64>,
    gas: FastMap<GasType, Vec<Option<f64>>>,
    diag: Vec<i64>,
}

impl GasData {
    pub fn from_samples(samples: &[GasSample]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by_key(|s| s.datetime);

        let mut data = GasData::default();
        for gas in [GasType::CH4, GasType::CO2, GasType::N2O, GasType::H2O] {
            if sorted.iter().any(|s| s.value(gas).is_some()) {
                data.gas.insert(gas, sorted.iter().map(|s| s.value(gas)).collect());
            }
        }
        data.datetime = sorted.iter().map(|s| s.datetime).collect();
        data.diag = sorted.iter().map(|s| s.diag).collect();
        data
    }

    pub fn load<T: TimeSeriesProvider + ?Sized>(
        provider: &T,
        serial: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, QueryError> {
        Ok(Self::from_samples(&provider.query(serial, start, end)?))
    }

    pub fn len(&self) -> usize {
        self.datetime.len()
    }

    pub fn datetime(&self) -> &[i64] {
        &self.datetime
    }

    /// Column of `gas`, None when the gas was never measured.
    pub fn column(&self, gas: GasType) -> Option<&[Option<f64>]> {
        self.gas.get(&gas).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.datetime.is_empty()
    }

    /// Index range of the rows with `start <= datetime < end`.
    pub fn index_range(&self, start: i64, end: i64) -> Range<usize> {
        let lo = self.datetime.partition_point(|&t| t < start);
        let hi = self.datetime.partition_point(|&t| t < end).max(lo);
        lo..hi
    }

    pub fn count_in(&self, start: i64, end: i64) -> usize {
        self.index_range(start, end).len()
    }

    pub fn slice(&self, start: i64, end: i64) -> GasData {
        let range = self.index_range(start, end);
        GasData {
            datetime: self.datetime[range.clone()].to_vec(),
            gas: self.gas.iter().map(|(k, v)| (*k, v[range.clone()].to_vec())).collect(),
            diag: self.diag[range].to_vec(),
        }
    }

    /// Values of `gas`, all None when the gas was never measured.
    pub fn values(&self, gas: GasType) -> Vec<Option<f64>> {
        match self.gas.get(&gas) {
            Some(v) => v.clone(),
            None => vec![None; self.len()],
        }
    }

    pub fn value_at(&self, gas: GasType, idx: usize) -> Option<f64> {
        self.gas.get(&gas).and_then(|v| v.get(idx).copied().flatten())
    }

    /// Non-null (timestamp, value) pairs in `[start, end)`.
    pub fn valid_points(&self, gas: GasType, start: i64, end: i64) -> Vec<(i64, f64)> {
        let range = self.index_range(start, end);
        let Some(values) = self.gas.get(&gas) else {
            return Vec::new();
        };
        range
            .filter_map(|i| values[i].filter(|v| v.is_finite()).map(|v| (self.datetime[i], v)))
            .collect()
    }

    pub fn diag_sum(&self, start: i64, end: i64) -> i64 {
        self.diag[self.index_range(start, end)].iter().sum()
    }
}

pub fn insert_measurements(
    conn: &Connection,
    serial: &str,
    samples: &[GasSample],
) -> Result<usize, QueryError> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO gas (instrument_serial, datetime, ch4, co2, n2o, h2o, diag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(instrument_serial, datetime) DO NOTHING",
        )?;
        for s in samples {
            inserted += stmt.execute(params![
                serial, s.datetime, s.ch4, s.co2, s.n2o, s.h2o, s.diag
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

pub fn query_gas(
    conn: &Connection,
    serial: &str,
    start: i64,
    end: i64,
) -> Result<Vec<GasSample>, QueryError> {
    let mut stmt = conn.prepare(
        "SELECT datetime, ch4, co2, n2o, h2o, diag
         FROM gas
         WHERE instrument_serial = ?1 AND datetime >= ?2 AND datetime < ?3
         ORDER BY datetime",
    )?;
    let rows = stmt.query_map(params![serial, start, end], |row| {
        Ok(GasSample {
            datetime: row.get(0)?,
            ch4: row.get(1)?,
            co2: row.get(2)?,
            n2o: row.get(3)?,
            h2o: row.get(4)?,
            diag: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

impl TimeSeriesProvider for Connection {
    fn query(
        &self,
        instrument_serial: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GasSample>, QueryError> {
        query_gas(self, instrument_serial, start.timestamp(), end.timestamp())
    }
}

/// In-memory series keyed by instrument serial.
pub type GasDataSet = FastMap<String, GasData>;

impl TimeSeriesProvider for GasDataSet {
    fn query(
        &self,
        instrument_serial: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GasSample>, QueryError> {
        let Some(data) = self.get(instrument_serial) else {
            return Ok(Vec::new());
        };
        let range = data.index_range(start.timestamp(), end.timestamp());
        Ok(range
            .map(|i| {
                let mut sample = GasSample::new(data.datetime[i]).with_diag(data.diag[i]);
                for gas in data.gas.keys() {
                    sample = sample.with_value(*gas, data.value_at(*gas, i));
                }
                sample
            })
            .collect())
    }
}

/// Canonical gas csv: `datetime` plus any of `ch4`, `co2`, `n2o`, `h2o`, `diag`.
pub fn read_gas_csv<P: AsRef<Path>>(path: P, tz: Tz) -> Result<Vec<GasSample>, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = rdr.headers()?.clone();

    let dt_idx = require_column(&headers, "datetime")?;
    let gas_idx: Vec<(GasType, Option<usize>)> =
        [GasType::CH4, GasType::CO2, GasType::N2O, GasType::H2O]
            .into_iter()
            .map(|g| (g, column_index(&headers, g.column_name())))
            .collect();
    let diag_idx = column_index(&headers, "diag");

    let mut samples = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let row = i + 2;
        let record = result?;
        let raw_dt = record.get(dt_idx).unwrap_or_default();
        let datetime =
            parse_datetime(raw_dt, tz).map_err(|reason| IngestError::Parse { row, reason })?;

        let mut sample = GasSample::new(datetime);
        for (gas, idx) in &gas_idx {
            sample = sample.with_value(*gas, parse_optional_f64(&record, *idx, row)?);
        }
        let diag = parse_optional_f64(&record, diag_idx, row)?.unwrap_or(0.0);
        samples.push(sample.with_diag(diag as i64));
    }
    Ok(samples)
}
