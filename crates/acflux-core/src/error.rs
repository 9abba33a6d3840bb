use crate::gastype::GasType;
use crate::instruments::InstrumentType;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("chamber id can't be empty")]
    EmptyChamber,
    #[error("offsets must satisfy 0 <= close < open < end, got close={close}, open={open}, end={end}")]
    BadOffsets { close: i64, open: i64, end: i64 },
}

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("invalid value in column {column}: {value}")]
    BadValue { column: String, value: String },
    #[error("invalid cycle definition in store: {0}")]
    Definition(#[from] DefinitionError),
}

#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("chamber height must be positive, got {0}")]
    NonPositiveHeight(f64),
    #[error("{gas} is not a flux gas of {model}")]
    NotFluxGas { gas: GasType, model: InstrumentType },
    #[error("calculation window {start}..{end} does not overlap the closed interval")]
    BadWindow { start: i64, end: i64 },
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing column {0}")]
    MissingColumn(&'static str),
    #[error("row {row}: {reason}")]
    Parse { row: usize, reason: String },
}
