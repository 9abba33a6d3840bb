use crate::gastype::GasType;
use rusqlite::{Connection, Result};

pub const DB_VERSION: i32 = 2; // latest schema version

/// Positions in [`fluxes_columns`].
pub mod fluxes_col {
    pub const START_TIME: usize = 0;
    pub const CHAMBER_ID: usize = 1;
    pub const INSTRUMENT_SERIAL: usize = 2;
    pub const INSTRUMENT_MODEL: usize = 3;
    pub const CLOSE_OFFSET: usize = 4;
    pub const OPEN_OFFSET: usize = 5;
    pub const END_OFFSET: usize = 6;
    pub const LAGTIME: usize = 7;
    pub const AIR_TEMPERATURE: usize = 8;
    pub const AIR_PRESSURE: usize = 9;
    pub const CHAMBER_HEIGHT: usize = 10;
    pub const DEFAULT_TEMPERATURE: usize = 11;
    pub const DEFAULT_PRESSURE: usize = 12;
    pub const DEFAULT_HEIGHT: usize = 13;
    pub const QUALITY_R: usize = 14;
    pub const QUALITY_R2: usize = 15;
    pub const IS_VALID: usize = 16;
    pub const IS_VALID_MANUAL: usize = 17;
    pub const ERROR_CODE: usize = 18;
    pub const ERROR_STRING: usize = 19;
    pub const UPDATED_HEIGHT: usize = 20;
    pub const WINDOW_FALLBACK: usize = 21;
    /// first per gas column, each gas has `GAS_STRIDE` of them
    pub const GAS_BASE: usize = 22;
    pub const GAS_STRIDE: usize = 6;
}

pub const BASE_COLUMNS: &[&str] = &[
    "start_time",
    "chamber_id",
    "instrument_serial",
    "instrument_model",
    "close_offset",
    "open_offset",
    "end_offset",
    "lagtime",
    "air_temperature",
    "air_pressure",
    "chamber_height",
    "default_temperature",
    "default_pressure",
    "default_height",
    "quality_r",
    "quality_r2",
    "is_valid",
    "is_valid_manual",
    "error_code",
    "error_string",
    "updated_height",
    "window_fallback",
];

/// Every fluxes column in codec order, per gas columns follow [`GasType::FLUX_COLUMNS`].
pub fn fluxes_columns() -> Vec<String> {
    let mut cols: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for gas in GasType::FLUX_COLUMNS {
        cols.push(gas.slope_col());
        cols.push(gas.flux_col());
        cols.push(gas.r_col());
        cols.push(gas.r2_col());
        cols.push(gas.calc_offset_s_col());
        cols.push(gas.calc_offset_e_col());
    }
    cols
}

pub fn create_instruments_table() -> String {
    "CREATE TABLE IF NOT EXISTS instruments (
            serial      TEXT PRIMARY KEY,
            model       TEXT NOT NULL
        )"
    .to_owned()
}

pub fn create_gas_table() -> String {
    "CREATE TABLE IF NOT EXISTS gas (
            instrument_serial   TEXT NOT NULL,
            datetime            INTEGER NOT NULL,
            ch4                 FLOAT,
            co2                 FLOAT,
            n2o                 FLOAT,
            h2o                 FLOAT,
            diag                INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (instrument_serial, datetime)
        )"
    .to_owned()
}

pub fn create_cycle_table() -> String {
    "CREATE TABLE IF NOT EXISTS cycles (
            chamber_id      TEXT NOT NULL,
            start_time      INTEGER NOT NULL,
            close_offset    INTEGER NOT NULL,
            open_offset     INTEGER NOT NULL,
            end_offset      INTEGER NOT NULL,
            PRIMARY KEY (chamber_id, start_time)
        )"
    .to_owned()
}

pub fn create_meteo_table() -> String {
    "CREATE TABLE IF NOT EXISTS meteo (
            datetime            INTEGER NOT NULL,
            source              TEXT NOT NULL,
            air_temperature     FLOAT NOT NULL,
            air_pressure        FLOAT NOT NULL,
            PRIMARY KEY (source, datetime)
        )"
    .to_owned()
}

pub fn create_height_table() -> String {
    "CREATE TABLE IF NOT EXISTS height (
            chamber_id      TEXT NOT NULL,
            datetime        INTEGER NOT NULL,
            height          FLOAT NOT NULL,
            PRIMARY KEY (chamber_id, datetime)
        )"
    .to_owned()
}

pub fn create_flux_table() -> String {
    let mut gas_cols = String::new();
    for gas in GasType::FLUX_COLUMNS {
        gas_cols.push_str(&format!(
            "            {} FLOAT,\n            {} FLOAT,\n            {} FLOAT,\n            {} FLOAT,\n            {} INTEGER,\n            {} INTEGER,\n",
            gas.slope_col(),
            gas.flux_col(),
            gas.r_col(),
            gas.r2_col(),
            gas.calc_offset_s_col(),
            gas.calc_offset_e_col(),
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS fluxes (
            start_time              INTEGER NOT NULL,
            chamber_id              TEXT NOT NULL,
            instrument_serial       TEXT NOT NULL,
            instrument_model        TEXT NOT NULL,
            close_offset            INTEGER NOT NULL,
            open_offset             INTEGER NOT NULL,
            end_offset              INTEGER NOT NULL,
            lagtime                 INTEGER NOT NULL,
            air_temperature         FLOAT,
            air_pressure            FLOAT,
            chamber_height          FLOAT,
            default_temperature     BOOL NOT NULL,
            default_pressure        BOOL NOT NULL,
            default_height          BOOL NOT NULL,
            quality_r               FLOAT,
            quality_r2              FLOAT,
            is_valid                BOOL NOT NULL,
            is_valid_manual         BOOL,
            error_code              INTEGER NOT NULL,
            error_string            TEXT NOT NULL,
            updated_height          BOOL NOT NULL DEFAULT 0,
            window_fallback         BOOL NOT NULL DEFAULT 0,
{gas_cols}
            PRIMARY KEY (start_time, chamber_id, instrument_serial)
        )"
    )
}

pub fn initiate_tables(conn: &Connection) -> Result<()> {
    conn.execute(&create_instruments_table(), [])?;
    conn.execute(&create_gas_table(), [])?;
    conn.execute(&create_cycle_table(), [])?;
    conn.execute(&create_meteo_table(), [])?;
    conn.execute(&create_height_table(), [])?;
    conn.execute(&create_flux_table(), [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fluxes_chamber_start ON fluxes (chamber_id, start_time)",
        [],
    )?;
    conn.execute(&format!("PRAGMA user_version = {};", DB_VERSION), [])?;
    Ok(())
}
