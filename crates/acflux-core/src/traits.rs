//! Seams to the collaborators around the flux engine. Each has a SQLite implementation
//! on `rusqlite::Connection`. The read side also has in-memory ones in `data_formats`.

use crate::cycle::definition::CycleDefinition;
use crate::cycle::record::FluxRow;
use crate::data_formats::gasdata::GasSample;
use crate::error::QueryError;

use chrono::{DateTime, Utc};

pub trait TimeSeriesProvider {
    /// Samples of one instrument in `[start, end)`, ordered by time.
    fn query(
        &self,
        instrument_serial: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GasSample>, QueryError>;
}

pub trait EnvironmentProvider {
    /// Nearest (temperature °C, pressure hPa) within ±30 minutes.
    fn nearest_meteo(
        &self,
        timestamp: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<Option<(f64, f64)>, QueryError>;

    /// Most recent chamber height at or before `timestamp`.
    fn nearest_volume(
        &self,
        timestamp: DateTime<Utc>,
        chamber_id: &str,
    ) -> Result<Option<f64>, QueryError>;
}

pub trait PersistenceGateway {
    /// Insert or replace the row keyed by (start_time, chamber_id, instrument_serial).
    fn upsert(&self, row: &FluxRow) -> Result<(), QueryError>;

    fn upsert_many(&self, rows: &[FluxRow]) -> Result<usize, QueryError> {
        for row in rows {
            self.upsert(row)?;
        }
        Ok(rows.len())
    }

    /// First row of `serial` at `start_time`, whichever chamber it belongs to.
    fn get(&self, start_time: DateTime<Utc>, serial: &str) -> Result<Option<FluxRow>, QueryError>;

    /// The row under the full (start_time, chamber_id, instrument_serial) key.
    fn get_cycle(
        &self,
        start_time: DateTime<Utc>,
        chamber_id: &str,
        serial: &str,
    ) -> Result<Option<FluxRow>, QueryError>;

    /// Rows with `start <= start_time < end`, ordered by start_time. Empty `chamber_ids`
    /// means every chamber.
    fn range_query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        chamber_ids: &[String],
        is_valid: Option<bool>,
        serial: Option<&str>,
    ) -> Result<Vec<FluxRow>, QueryError>;
}

pub trait CycleDefinitionSource {
    /// Definitions with `start <= start_time < end`, ordered by start_time.
    fn range_query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CycleDefinition>, QueryError>;
}
