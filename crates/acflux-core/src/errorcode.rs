use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    HasErrors,
    NoData,
    NoAirTemperature,
    NoAirPressure,
    TooManyMeasurements,
    TooFewMeasurements,
    HighRStd,
    ImproperClose,
    FewUnique,
    NullGasMeasurements,
    ManualInvalid,
}

impl ErrorCode {
    pub const HAS_ERRORS: u16 = 1 << 0;
    pub const NO_DATA: u16 = 1 << 1;
    pub const NO_AIR_TEMPERATURE: u16 = 1 << 2;
    pub const NO_AIR_PRESSURE: u16 = 1 << 3;
    pub const TOO_MANY_MEASUREMENTS: u16 = 1 << 4;
    pub const TOO_FEW_MEASUREMENTS: u16 = 1 << 5;
    pub const HIGH_R_STD: u16 = 1 << 6;
    pub const IMPROPER_CLOSE: u16 = 1 << 7;
    pub const FEW_UNIQUE: u16 = 1 << 8;
    pub const NULL_GAS_MEASUREMENTS: u16 = 1 << 9;
    pub const MANUAL_INVALID: u16 = 1 << 10;

    /// In bit order, lowest first.
    pub const ALL: [ErrorCode; 11] = [
        ErrorCode::HasErrors,
        ErrorCode::NoData,
        ErrorCode::NoAirTemperature,
        ErrorCode::NoAirPressure,
        ErrorCode::TooManyMeasurements,
        ErrorCode::TooFewMeasurements,
        ErrorCode::HighRStd,
        ErrorCode::ImproperClose,
        ErrorCode::FewUnique,
        ErrorCode::NullGasMeasurements,
        ErrorCode::ManualInvalid,
    ];

    /// Convert an `ErrorCode` to its corresponding bitmask
    pub fn to_mask(&self) -> u16 {
        match self {
            ErrorCode::HasErrors => Self::HAS_ERRORS,
            ErrorCode::NoData => Self::NO_DATA,
            ErrorCode::NoAirTemperature => Self::NO_AIR_TEMPERATURE,
            ErrorCode::NoAirPressure => Self::NO_AIR_PRESSURE,
            ErrorCode::TooManyMeasurements => Self::TOO_MANY_MEASUREMENTS,
            ErrorCode::TooFewMeasurements => Self::TOO_FEW_MEASUREMENTS,
            ErrorCode::HighRStd => Self::HIGH_R_STD,
            ErrorCode::ImproperClose => Self::IMPROPER_CLOSE,
            ErrorCode::FewUnique => Self::FEW_UNIQUE,
            ErrorCode::NullGasMeasurements => Self::NULL_GAS_MEASUREMENTS,
            ErrorCode::ManualInvalid => Self::MANUAL_INVALID,
        }
    }

    /// Convert a bitmask into a list of `ErrorCode` values
    pub fn from_mask(mask: u16) -> Vec<ErrorCode> {
        Self::ALL.into_iter().filter(|e| mask & e.to_mask() != 0).collect()
    }
}

/// Label stored in `error_string`
impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let message = match self {
            ErrorCode::HasErrors => "has errors",
            ErrorCode::NoData => "no data",
            ErrorCode::NoAirTemperature => "no air_temperature",
            ErrorCode::NoAirPressure => "no air_pressure",
            ErrorCode::TooManyMeasurements => "too many measurements",
            ErrorCode::TooFewMeasurements => "too few measurements",
            ErrorCode::HighRStd => "high r std",
            ErrorCode::ImproperClose => "improper close",
            ErrorCode::FewUnique => "few unique values",
            ErrorCode::NullGasMeasurements => "null gas measurements",
            ErrorCode::ManualInvalid => "manual invalid",
        };
        write!(f, "{}", message)
    }
}

/// Wrapper struct for managing the error bitmask
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMask(pub u16);

impl BitOr for ErrorCode {
    type Output = ErrorMask;
    fn bitor(self, rhs: Self) -> Self::Output {
        ErrorMask(self.to_mask() | rhs.to_mask())
    }
}

impl BitOr for ErrorMask {
    type Output = ErrorMask;
    fn bitor(self, rhs: Self) -> Self::Output {
        ErrorMask(self.0 | rhs.0)
    }
}

impl BitOr<ErrorCode> for ErrorMask {
    type Output = ErrorMask;
    fn bitor(self, rhs: ErrorCode) -> Self::Output {
        ErrorMask(self.0 | rhs.to_mask())
    }
}

impl BitOrAssign<ErrorCode> for ErrorMask {
    fn bitor_assign(&mut self, rhs: ErrorCode) {
        self.0 |= rhs.to_mask();
    }
}

impl BitOrAssign<ErrorMask> for ErrorMask {
    fn bitor_assign(&mut self, rhs: ErrorMask) {
        self.0 |= rhs.0;
    }
}

impl From<ErrorCode> for ErrorMask {
    fn from(code: ErrorCode) -> Self {
        ErrorMask(code.to_mask())
    }
}

impl ErrorMask {
    pub fn from_u16(value: u16) -> Self {
        ErrorMask(value)
    }
    pub fn contains(&self, code: ErrorCode) -> bool {
        self.0 & code.to_mask() != 0
    }
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
    pub fn codes(&self) -> Vec<ErrorCode> {
        ErrorCode::from_mask(self.0)
    }
}

/// Comma joined labels of every set bit
impl fmt::Display for ErrorMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let labels: Vec<String> = self.codes().iter().map(|c| c.to_string()).collect();
        write!(f, "{}", labels.join(", "))
    }
}
