use crate::constants::{GAS_CONSTANT, KELVIN_OFFSET, ROUND_DECIMALS};
use crate::gastype::GasType;
use crate::stats::{pearson_correlation, round_to, LinReg};

/// Slope, fit quality and flux of one gas over its regression window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinearFit {
    /// concentration unit per second
    pub slope: f64,
    pub r: f64,
    pub r2: f64,
    pub n: usize,
}

impl LinearFit {
    /// OLS slope of value against elapsed seconds. Empty or degenerate input gives an all
    /// zero fit.
    pub fn from_points(points: &[(i64, f64)]) -> Self {
        let Some(&(t0, _)) = points.first() else {
            return Self::default();
        };
        let x: Vec<f64> = points.iter().map(|(t, _)| (t - t0) as f64).collect();
        let y: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

        let Some(model) = LinReg::train(&x, &y) else {
            return Self { n: points.len(), ..Self::default() };
        };
        let r = pearson_correlation(&x, &y).unwrap_or(0.0);
        Self { slope: model.slope, r, r2: r * r, n: points.len() }
    }
}

/// Flux in mg/m²/h from a slope in the instrument unit per second.
///
/// `height` in m, `temperature` in °C, `pressure` in hPa. Rounded to 10 decimals and
/// never NaN.
pub fn calculate_gas_flux(
    gas: GasType,
    slope: f64,
    height: f64,
    temperature: f64,
    pressure: f64,
) -> f64 {
    let mol_mass = gas.mol_mass();
    let slope_ppm_hour = slope / gas.conv_factor() * 60. * 60.;
    let p = pressure * 100.0;
    let t = temperature + KELVIN_OFFSET;

    let flux = slope_ppm_hour / 1_000_000.0 * height * ((mol_mass * p) / (GAS_CONSTANT * t)) * 1000.0;
    round_to(flux, ROUND_DECIMALS)
}
