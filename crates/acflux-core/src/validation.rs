//! Data quality checks folded into an [`ErrorMask`].
//!
//! The checks are pure: they read a [`ValiditySnapshot`] of the cycle and return the bits
//! they raise. The cycle ORs the result into its stored code.

use crate::constants::{
    MIN_UNIQUE_VALUES, R_STD_LIMIT, TOO_FEW_FACTOR, TOO_MANY_FACTOR, TREND_BUCKET_S,
    TREND_UP_PERCENT,
};
use crate::data_formats::gasdata::GasData;
use crate::errorcode::{ErrorCode, ErrorMask};
use crate::gastype::GasType;

use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationConfig {
    /// raise bit 64 when the candidate r values of the lag gas spread too much
    pub check_r_spread: bool,
    pub r_std_limit: f64,
    pub min_unique: usize,
    pub trend_bucket_s: i64,
    pub trend_up_percent: f64,
    pub too_many_factor: f64,
    pub too_few_factor: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_r_spread: false,
            r_std_limit: R_STD_LIMIT,
            min_unique: MIN_UNIQUE_VALUES,
            trend_bucket_s: TREND_BUCKET_S,
            trend_up_percent: TREND_UP_PERCENT,
            too_many_factor: TOO_MANY_FACTOR,
            too_few_factor: TOO_FEW_FACTOR,
        }
    }
}

/// The parts of a cycle the checks look at. Times are epoch seconds, `close` and `open`
/// already include the lag.
#[derive(Debug, Clone)]
pub struct ValiditySnapshot<'a> {
    pub data: &'a GasData,
    pub close: i64,
    pub open: i64,
    pub end: i64,
    pub lag_gas: GasType,
    /// regression window per flux gas, both ends inclusive
    pub flux_windows: Vec<(GasType, i64, i64)>,
    pub default_temperature: bool,
    pub default_pressure: bool,
    pub r_std: Option<f64>,
}

/// Checks that need no computed results.
pub fn check_valid_early(snap: &ValiditySnapshot) -> ErrorMask {
    let mut mask = ErrorMask::default();
    if snap.data.is_empty() {
        mask |= ErrorCode::NoData;
    }
    if snap.default_temperature {
        mask |= ErrorCode::NoAirTemperature;
    }
    if snap.default_pressure {
        mask |= ErrorCode::NoAirPressure;
    }
    mask
}

/// Checks on the closed period after lag and regression windows are known. Diagnostic
/// errors short circuit everything else.
pub fn check_valid_deferred(snap: &ValiditySnapshot, config: &ValidationConfig) -> ErrorMask {
    let mut mask = ErrorMask::default();
    if snap.data.diag_sum(snap.close, snap.open) != 0 {
        tracing::debug!("diagnostic errors between close and open");
        return ErrorMask::from(ErrorCode::HasErrors);
    }

    let len = snap.data.count_in(snap.close, snap.open);
    let duration = (snap.open - snap.close) as f64;
    if len == 0 {
        mask |= ErrorCode::NoData;
    }
    if len as f64 > duration * config.too_many_factor {
        mask |= ErrorCode::TooManyMeasurements;
    }
    if duration * config.too_few_factor > len as f64 {
        mask |= ErrorCode::TooFewMeasurements;
    }
    if config.check_r_spread && snap.r_std.is_some_and(|s| s > config.r_std_limit) {
        mask |= ErrorCode::HighRStd;
    }
    if trends_up(snap.data, snap.lag_gas, snap.close, snap.end, config) {
        mask |= ErrorCode::ImproperClose;
    }
    if unique_values(snap.data, snap.lag_gas, snap.close, snap.open) < config.min_unique {
        mask |= ErrorCode::FewUnique;
    }
    let missing_gas = snap
        .flux_windows
        .iter()
        .any(|&(gas, s, e)| snap.data.valid_points(gas, s, e + 1).is_empty());
    if missing_gas {
        mask |= ErrorCode::NullGasMeasurements;
    }
    mask
}

/// Full classification. Any early bit ends it, the deferred checks only run on a cycle
/// with data and meteo.
pub fn classify(snap: &ValiditySnapshot, config: &ValidationConfig) -> ErrorMask {
    let early = check_valid_early(snap);
    if !early.is_empty() {
        return early;
    }
    check_valid_deferred(snap, config)
}

/// True when the bucket maxima of `gas` over `[start, end)` keep rising in at least
/// `trend_up_percent` of the buckets, i.e. the chamber never vented.
fn trends_up(data: &GasData, gas: GasType, start: i64, end: i64, config: &ValidationConfig) -> bool {
    let bucket = config.trend_bucket_s.max(1);
    let range = data.index_range(start, end);
    if range.is_empty() {
        return false;
    }
    let datetime = data.datetime();
    let first_bin = datetime[range.start].div_euclid(bucket);
    let last_bin = datetime[range.end - 1].div_euclid(bucket);

    let mut maxima: Vec<Option<f64>> = vec![None; (last_bin - first_bin + 1) as usize];
    for i in range {
        let Some(v) = data.value_at(gas, i).filter(|v| v.is_finite()) else {
            continue;
        };
        let slot = &mut maxima[(datetime[i].div_euclid(bucket) - first_bin) as usize];
        *slot = Some(slot.map_or(v, |m: f64| m.max(v)));
    }

    let mut up = 0;
    for (i, cur) in maxima.iter().enumerate() {
        let rising = match (i.checked_sub(1).map(|p| maxima[p]), cur) {
            (None, Some(_)) => true,
            (Some(Some(prev)), Some(cur)) => *cur >= prev,
            _ => false,
        };
        if rising {
            up += 1;
        }
    }
    let percent = up as f64 / maxima.len() as f64 * 100.0;
    tracing::debug!("upward percent: {:.1}", percent);
    percent >= config.trend_up_percent
}

fn unique_values(data: &GasData, gas: GasType, start: i64, end: i64) -> usize {
    data.valid_points(gas, start, end)
        .into_iter()
        // -0.0 and 0.0 are the same reading
        .map(|(_, v)| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
        .unique()
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_formats::gasdata::GasSample;

    const CLOSE: i64 = 1_000_020;
    const OPEN: i64 = 1_000_660;
    const END: i64 = 1_000_860;

    fn data(f: impl Fn(i64) -> Option<f64>) -> GasData {
        let samples: Vec<GasSample> = (1_000_000..1_000_900)
            .map(|t| GasSample::new(t).with_value(GasType::CH4, f(t)))
            .collect();
        GasData::from_samples(&samples)
    }

    /// rises while closed, drops after opening
    fn good(t: i64) -> Option<f64> {
        Some(if t < OPEN { 2000.0 + (t - CLOSE) as f64 } else { 1900.0 - (t - OPEN) as f64 })
    }

    fn snap(data: &GasData) -> ValiditySnapshot<'_> {
        ValiditySnapshot {
            data,
            close: CLOSE,
            open: OPEN,
            end: END,
            lag_gas: GasType::CH4,
            flux_windows: vec![(GasType::CH4, CLOSE + 100, CLOSE + 300)],
            default_temperature: false,
            default_pressure: false,
            r_std: None,
        }
    }

    #[test]
    fn clean_cycle_has_no_bits() {
        let d = data(good);
        assert_eq!(classify(&snap(&d), &ValidationConfig::default()), ErrorMask(0));
    }

    #[test]
    fn early_bits_stop_classification() {
        // would also be an improper close with few unique values
        let d = data(|t| Some(if t % 2 == 0 { 2000.0 } else { 2001.0 }));
        let mut s = snap(&d);
        s.default_temperature = true;
        let config = ValidationConfig::default();
        assert_eq!(classify(&s, &config).codes(), vec![ErrorCode::NoAirTemperature]);

        s.default_pressure = true;
        assert_eq!(
            classify(&s, &config).codes(),
            vec![ErrorCode::NoAirTemperature, ErrorCode::NoAirPressure]
        );

        s.default_temperature = false;
        s.default_pressure = false;
        let mask = classify(&s, &config);
        assert!(mask.contains(ErrorCode::FewUnique));
        assert!(!mask.contains(ErrorCode::NoAirTemperature));
    }

    #[test]
    fn empty_data_only_runs_early() {
        let d = GasData::default();
        let mut s = snap(&d);
        s.default_temperature = true;
        let mask = classify(&s, &ValidationConfig::default());
        assert_eq!(mask.codes(), vec![ErrorCode::NoData, ErrorCode::NoAirTemperature]);
    }

    #[test]
    fn diag_errors_short_circuit() {
        let samples: Vec<GasSample> = (1_000_000..1_000_900)
            .map(|t| {
                GasSample::new(t)
                    .with_value(GasType::CH4, Some(2000.0))
                    .with_diag(if t == CLOSE + 5 { 32 } else { 0 })
            })
            .collect();
        let d = GasData::from_samples(&samples);
        let mask = classify(&snap(&d), &ValidationConfig::default());
        assert_eq!(mask.codes(), vec![ErrorCode::HasErrors]);
    }

    #[test]
    fn sample_count_bounds() {
        // every third second missing
        let samples: Vec<GasSample> = (1_000_000..1_000_900)
            .filter(|t| t % 3 != 0)
            .map(|t| GasSample::new(t).with_value(GasType::CH4, good(t)))
            .collect();
        let sparse = GasData::from_samples(&samples);
        let mask = check_valid_deferred(&snap(&sparse), &ValidationConfig::default());
        assert!(mask.contains(ErrorCode::TooFewMeasurements));
        assert!(!mask.contains(ErrorCode::TooManyMeasurements));

        let mut doubled: Vec<GasSample> = (1_000_000..1_000_900)
            .map(|t| GasSample::new(t).with_value(GasType::CH4, good(t)))
            .collect();
        doubled.extend(doubled.clone());
        let dense = GasData::from_samples(&doubled);
        let mask = check_valid_deferred(&snap(&dense), &ValidationConfig::default());
        assert!(mask.contains(ErrorCode::TooManyMeasurements));
    }

    #[test]
    fn still_rising_after_open_is_improper_close() {
        let d = data(|t| Some(2000.0 + (t - CLOSE) as f64));
        let mask = check_valid_deferred(&snap(&d), &ValidationConfig::default());
        assert!(mask.contains(ErrorCode::ImproperClose));
    }

    #[test]
    fn trend_counts_empty_buckets_as_not_rising() {
        // rising everywhere but a 60 s gap after close leaves empty buckets
        let d = data(|t| {
            if (CLOSE + 100..CLOSE + 160).contains(&t) {
                None
            } else {
                Some(2000.0 + (t - CLOSE) as f64)
            }
        });
        let mask = check_valid_deferred(&snap(&d), &ValidationConfig::default());
        assert!(!mask.contains(ErrorCode::ImproperClose));
    }

    #[test]
    fn flat_signal_has_few_unique_values() {
        let d = data(|t| Some(if t % 2 == 0 { 2000.0 } else { 2001.0 }));
        let mask = check_valid_deferred(&snap(&d), &ValidationConfig::default());
        assert!(mask.contains(ErrorCode::FewUnique));
    }

    #[test]
    fn null_regression_window() {
        let d = data(|t| if (CLOSE + 100..=CLOSE + 300).contains(&t) { None } else { good(t) });
        let mask = check_valid_deferred(&snap(&d), &ValidationConfig::default());
        assert!(mask.contains(ErrorCode::NullGasMeasurements));

        let mut s = snap(&d);
        s.flux_windows = vec![(GasType::CH4, CLOSE + 301, CLOSE + 400)];
        assert!(!check_valid_deferred(&s, &ValidationConfig::default())
            .contains(ErrorCode::NullGasMeasurements));
    }

    #[test]
    fn r_spread_only_when_enabled() {
        let d = data(good);
        let mut s = snap(&d);
        s.r_std = Some(0.2);
        assert!(!classify(&s, &ValidationConfig::default()).contains(ErrorCode::HighRStd));
        let config = ValidationConfig { check_r_spread: true, ..Default::default() };
        assert!(classify(&s, &config).contains(ErrorCode::HighRStd));
        s.r_std = Some(0.1);
        assert!(!classify(&s, &config).contains(ErrorCode::HighRStd));
    }
}
