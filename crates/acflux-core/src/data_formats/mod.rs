pub mod fluxdata;
pub mod gasdata;
pub mod heightdata;
pub mod meteodata;
pub mod timedata;

use crate::error::QueryError;
use crate::traits::EnvironmentProvider;
use heightdata::{get_previous_height, HeightData};
use meteodata::{get_nearest_meteo, MeteoData};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Meteo and chamber height series held in memory.
#[derive(Debug, Default, Clone)]
pub struct Environment {
    pub meteo: MeteoData,
    pub height: HeightData,
}

impl EnvironmentProvider for Environment {
    fn nearest_meteo(
        &self,
        timestamp: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<Option<(f64, f64)>, QueryError> {
        Ok(self.meteo.get_nearest(timestamp.timestamp(), source))
    }

    fn nearest_volume(
        &self,
        timestamp: DateTime<Utc>,
        chamber_id: &str,
    ) -> Result<Option<f64>, QueryError> {
        Ok(self.height.get_nearest_previous_height(timestamp.timestamp(), chamber_id))
    }
}

impl EnvironmentProvider for Connection {
    fn nearest_meteo(
        &self,
        timestamp: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<Option<(f64, f64)>, QueryError> {
        get_nearest_meteo(self, timestamp.timestamp(), source)
    }

    fn nearest_volume(
        &self,
        timestamp: DateTime<Utc>,
        chamber_id: &str,
    ) -> Result<Option<f64>, QueryError> {
        get_previous_height(self, chamber_id, timestamp.timestamp())
    }
}
