use crate::error::QueryError;
use crate::gastype::GasType;
use crate::types::FastMap;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug)]
pub struct ParseInstrumentError(String);

impl fmt::Display for ParseInstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseInstrumentError {}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    #[default]
    #[serde(rename = "LI-7810", alias = "LI7810")]
    LI7810,
    #[serde(rename = "LI-7820", alias = "LI7820")]
    LI7820,
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InstrumentType::LI7810 => write!(f, "LI-7810"),
            InstrumentType::LI7820 => write!(f, "LI-7820"),
        }
    }
}

impl FromStr for InstrumentType {
    type Err = ParseInstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "li-7810" => Ok(InstrumentType::LI7810),
            "li-7820" => Ok(InstrumentType::LI7820),
            "li7810" => Ok(InstrumentType::LI7810),
            "li7820" => Ok(InstrumentType::LI7820),
            other => Err(ParseInstrumentError(format!("invalid instrument: {other}"))),
        }
    }
}

impl InstrumentType {
    pub fn available_instruments() -> Vec<InstrumentType> {
        vec![InstrumentType::LI7810, InstrumentType::LI7820]
    }

    /// Every gas the analyzer reports, in column order.
    pub fn gases(&self) -> &'static [GasType] {
        match self {
            InstrumentType::LI7810 => &[GasType::CO2, GasType::CH4, GasType::H2O],
            InstrumentType::LI7820 => &[GasType::N2O, GasType::H2O],
        }
    }

    /// Gases a flux is computed for, in processing order.
    pub fn flux_gases(&self) -> &'static [GasType] {
        match self {
            InstrumentType::LI7810 => &[GasType::CO2, GasType::CH4],
            InstrumentType::LI7820 => &[GasType::N2O],
        }
    }

    /// Gas whose peak marks the chamber opening. Also the gas the closed window
    /// quality checks look at.
    pub fn lag_gas(&self) -> GasType {
        match self {
            InstrumentType::LI7810 => GasType::CH4,
            InstrumentType::LI7820 => GasType::N2O,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub model: InstrumentType,
    pub serial: String,
}

impl Instrument {
    pub fn new(model: InstrumentType, serial: impl Into<String>) -> Self {
        Self { model, serial: serial.into() }
    }
    pub fn gases(&self) -> &'static [GasType] {
        self.model.gases()
    }
    pub fn flux_gases(&self) -> &'static [GasType] {
        self.model.flux_gases()
    }
    pub fn lag_gas(&self) -> GasType {
        self.model.lag_gas()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "model: {}, serial: {}", self.model, self.serial,)
    }
}

/// Known instruments keyed by serial, resolved once at startup and handed to
/// whatever builds cycles.
#[derive(Debug, Default, Clone)]
pub struct InstrumentRegistry {
    instruments: FastMap<String, Instrument>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, instrument: Instrument) {
        self.instruments.insert(instrument.serial.clone(), instrument);
    }

    pub fn get(&self, serial: &str) -> Option<&Instrument> {
        self.instruments.get(serial)
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Sorted by serial so batch runs are reproducible.
    pub fn all(&self) -> Vec<Instrument> {
        let mut out: Vec<Instrument> = self.instruments.values().cloned().collect();
        out.sort_by(|a, b| a.serial.cmp(&b.serial));
        out
    }

    pub fn load(conn: &Connection) -> Result<Self, QueryError> {
        let mut stmt = conn.prepare("SELECT serial, model FROM instruments ORDER BY serial")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut registry = Self::new();
        for row in rows {
            let (serial, model) = row?;
            let model = model
                .parse::<InstrumentType>()
                .map_err(|_| QueryError::BadValue { column: "model".to_owned(), value: model })?;
            registry.register(Instrument { model, serial });
        }
        Ok(registry)
    }
}

pub fn insert_instrument(conn: &Connection, instrument: &Instrument) -> Result<usize, QueryError> {
    let n = conn.execute(
        "INSERT INTO instruments (serial, model) VALUES (?1, ?2)
         ON CONFLICT(serial) DO UPDATE SET model = excluded.model",
        params![instrument.serial, instrument.model.to_string()],
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fluxes_schema::initiate_tables;

    #[test]
    fn parses_both_spellings() {
        assert_eq!("LI-7810".parse::<InstrumentType>().unwrap(), InstrumentType::LI7810);
        assert_eq!("li7820".parse::<InstrumentType>().unwrap(), InstrumentType::LI7820);
        assert!("li7811".parse::<InstrumentType>().is_err());
    }

    #[test]
    fn flux_gases_are_measured() {
        for model in InstrumentType::available_instruments() {
            for gas in model.flux_gases() {
                assert!(model.gases().contains(gas));
            }
            assert!(model.gases().contains(&model.lag_gas()));
        }
    }

    #[test]
    fn registry_loads_from_db() {
        let conn = Connection::open_in_memory().unwrap();
        initiate_tables(&conn).unwrap();
        insert_instrument(&conn, &Instrument::new(InstrumentType::LI7820, "TG20-01072")).unwrap();
        insert_instrument(&conn, &Instrument::new(InstrumentType::LI7810, "TG10-01169")).unwrap();

        let registry = InstrumentRegistry::load(&conn).unwrap();
        assert_eq!(registry.get("TG20-01072").unwrap().model, InstrumentType::LI7820);
        let serials: Vec<String> = registry.all().into_iter().map(|i| i.serial).collect();
        assert_eq!(serials, vec!["TG10-01169", "TG20-01072"]);
    }
}
