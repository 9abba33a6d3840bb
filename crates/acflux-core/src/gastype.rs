use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug)]
pub struct ParseGasError(String);

impl fmt::Display for ParseGasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ParseGasError {}

#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub enum GasType {
    #[default]
    CO2,
    CH4,
    H2O,
    N2O,
}

impl fmt::Display for GasType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GasType::CO2 => write!(f, "CO2"),
            GasType::CH4 => write!(f, "CH4"),
            GasType::H2O => write!(f, "H2O"),
            GasType::N2O => write!(f, "N2O"),
        }
    }
}

impl FromStr for GasType {
    type Err = ParseGasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ch4" => Ok(GasType::CH4),
            "co2" => Ok(GasType::CO2),
            "h2o" => Ok(GasType::H2O),
            "n2o" => Ok(GasType::N2O),
            other => Err(ParseGasError(format!("Invalid gas: {other}"))),
        }
    }
}

impl GasType {
    /// Gases that have result columns in the fluxes table.
    pub const FLUX_COLUMNS: [GasType; 3] = [GasType::CH4, GasType::CO2, GasType::N2O];

    pub fn column_name(&self) -> &'static str {
        match self {
            GasType::CH4 => "ch4",
            GasType::CO2 => "co2",
            GasType::H2O => "h2o",
            GasType::N2O => "n2o",
        }
    }

    pub fn slope_col(&self) -> String {
        format!("{}_slope", self.column_name())
    }
    pub fn flux_col(&self) -> String {
        format!("{}_flux", self.column_name())
    }
    pub fn r_col(&self) -> String {
        format!("{}_r", self.column_name())
    }
    pub fn r2_col(&self) -> String {
        format!("{}_r2", self.column_name())
    }
    pub fn calc_offset_s_col(&self) -> String {
        format!("{}_calc_offset_s", self.column_name())
    }
    pub fn calc_offset_e_col(&self) -> String {
        format!("{}_calc_offset_e", self.column_name())
    }

    /// g/mol
    pub fn mol_mass(&self) -> f64 {
        match self {
            GasType::CH4 => 16.0,
            GasType::CO2 => 44.0,
            GasType::H2O => 18.0,
            GasType::N2O => 44.0,
        }
    }

    /// divisor taking the instrument unit to ppm
    pub fn conv_factor(&self) -> f64 {
        match self {
            GasType::CH4 => 1000.0,
            GasType::CO2 => 1.0,
            GasType::H2O => 1.0,
            GasType::N2O => 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitive() {
        assert_eq!("Ch4".parse::<GasType>().unwrap(), GasType::CH4);
        assert_eq!("n2o".parse::<GasType>().unwrap(), GasType::N2O);
        assert!("o3".parse::<GasType>().is_err());
    }

    #[test]
    fn result_columns() {
        assert_eq!(GasType::CH4.flux_col(), "ch4_flux");
        assert_eq!(GasType::N2O.calc_offset_e_col(), "n2o_calc_offset_e");
    }
}
