use std::fmt;
use std::str::FromStr;

/// Kinds of input the store ingests.
#[derive(Clone, PartialEq, Eq, Debug, Copy)]
pub enum DataType {
    Gas,
    Cycle,
    Meteo,
    Height,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataType::Gas => write!(f, "Gas data"),
            DataType::Cycle => write!(f, "Cycle data"),
            DataType::Meteo => write!(f, "Meteo data"),
            DataType::Height => write!(f, "Height data"),
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gas" => Ok(DataType::Gas),
            "cycle" => Ok(DataType::Cycle),
            "meteo" => Ok(DataType::Meteo),
            "height" => Ok(DataType::Height),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

impl DataType {
    pub fn type_str(&self) -> &'static str {
        match self {
            DataType::Gas => "gas",
            DataType::Cycle => "cycle",
            DataType::Meteo => "meteo",
            DataType::Height => "height",
        }
    }
}
