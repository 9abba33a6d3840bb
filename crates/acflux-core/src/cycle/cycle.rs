use crate::constants::{DEFAULT_HEIGHT, DEFAULT_PRESSURE, DEFAULT_TEMPERATURE};
use crate::cycle::definition::CycleDefinition;
use crate::cycle::lag::{LagConfig, LagDetector};
use crate::cycle::record::{FluxRow, GasResult};
use crate::cycle::window::{OptimizerConfig, WindowOptimizer};
use crate::data_formats::gasdata::GasData;
use crate::error::{CycleError, QueryError};
use crate::errorcode::{ErrorCode, ErrorMask};
use crate::flux::{calculate_gas_flux, LinearFit};
use crate::gastype::GasType;
use crate::instruments::Instrument;
use crate::stats::{pearson_correlation, population_std, round_to};
use crate::traits::{EnvironmentProvider, TimeSeriesProvider};
use crate::validation::{self, ValidationConfig, ValiditySnapshot};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Tunables of the whole pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleConfig {
    pub lag: LagConfig,
    pub optimizer: OptimizerConfig,
    pub validation: ValidationConfig,
}

/// One chamber closure of one instrument and everything computed from it.
#[derive(Clone)]
pub struct Cycle {
    definition: CycleDefinition,
    instrument: Instrument,
    config: CycleConfig,
    data: GasData,

    lagtime: i64,
    lag_computed: bool,
    has_errors: bool,
    results: BTreeMap<GasType, GasResult>,

    air_temperature: f64,
    air_pressure: f64,
    chamber_height: f64,
    default_temperature: bool,
    default_pressure: bool,
    default_height: bool,

    quality_r: f64,
    quality_r2: f64,
    /// population std of the lag gas r values seen by the window search
    r_std: Option<f64>,
    window_fallback: bool,
    updated_height: bool,

    error_code: ErrorMask,
    is_valid_manual: Option<bool>,
}

impl fmt::Debug for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle {{ {}, {}, lag: {}, error_code: {}, samples: {} }}",
            self.definition,
            self.instrument,
            self.lagtime,
            self.error_code.0,
            self.data.len()
        )
    }
}

impl Cycle {
    fn new(
        definition: CycleDefinition,
        instrument: Instrument,
        data: GasData,
        config: CycleConfig,
    ) -> Self {
        let results = instrument.flux_gases().iter().map(|g| (*g, GasResult::default())).collect();
        Self {
            definition,
            instrument,
            config,
            data,
            lagtime: 0,
            lag_computed: false,
            has_errors: false,
            results,
            air_temperature: DEFAULT_TEMPERATURE,
            air_pressure: DEFAULT_PRESSURE,
            chamber_height: DEFAULT_HEIGHT,
            default_temperature: true,
            default_pressure: true,
            default_height: true,
            quality_r: 0.0,
            quality_r2: 0.0,
            r_std: None,
            window_fallback: false,
            updated_height: false,
            error_code: ErrorMask::default(),
            is_valid_manual: None,
        }
    }

    /// Rebuilds a stored cycle without rerunning the search. A row flagged with a stale
    /// chamber height gets its fluxes recomputed with the stored height.
    pub fn from_row(row: &FluxRow, data: GasData, config: CycleConfig) -> Result<Self, CycleError> {
        let definition = row.definition()?;
        let instrument = Instrument::new(row.instrument_model, row.instrument_serial.clone());
        let mut cycle = Self::new(definition, instrument, data, config);

        cycle.lagtime = row.lagtime;
        cycle.lag_computed = true;
        cycle.error_code = ErrorMask::from_u16(row.error_code);
        cycle.has_errors = cycle.error_code.contains(ErrorCode::HasErrors);
        cycle.air_temperature = row.air_temperature;
        cycle.air_pressure = row.air_pressure;
        cycle.chamber_height = row.chamber_height;
        cycle.default_temperature = row.default_temperature;
        cycle.default_pressure = row.default_pressure;
        cycle.default_height = row.default_height;
        cycle.quality_r = row.quality_r;
        cycle.quality_r2 = row.quality_r2;
        cycle.is_valid_manual = row.is_valid_manual;
        cycle.window_fallback = row.window_fallback;
        for gas in cycle.instrument.flux_gases() {
            if let Some(res) = row.result(*gas) {
                cycle.results.insert(*gas, *res);
            }
        }

        if row.updated_height {
            tracing::debug!("chamber height changed for {}, recalculating", cycle.definition);
            cycle.calculate_fluxes();
        }
        Ok(cycle)
    }

    pub fn definition(&self) -> &CycleDefinition {
        &self.definition
    }
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }
    pub fn data(&self) -> &GasData {
        &self.data
    }
    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn start_ts(&self) -> i64 {
        self.definition.start_ts()
    }
    pub fn start_time(&self) -> DateTime<Utc> {
        self.definition.start_time()
    }
    /// close without lag
    pub fn og_close(&self) -> i64 {
        self.start_ts() + self.definition.close_offset()
    }
    /// open without lag
    pub fn og_open(&self) -> i64 {
        self.start_ts() + self.definition.open_offset()
    }
    pub fn close(&self) -> i64 {
        self.og_close() + self.lagtime
    }
    pub fn open(&self) -> i64 {
        self.og_open() + self.lagtime
    }
    /// lag never moves the end
    pub fn end(&self) -> i64 {
        self.start_ts() + self.definition.end_offset()
    }

    pub fn lagtime(&self) -> i64 {
        self.lagtime
    }
    pub fn lag_computed(&self) -> bool {
        self.lag_computed
    }
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }
    pub fn result(&self, gas: GasType) -> Option<&GasResult> {
        self.results.get(&gas)
    }
    pub fn air_temperature(&self) -> f64 {
        self.air_temperature
    }
    pub fn air_pressure(&self) -> f64 {
        self.air_pressure
    }
    pub fn chamber_height(&self) -> f64 {
        self.chamber_height
    }
    pub fn default_temperature(&self) -> bool {
        self.default_temperature
    }
    pub fn default_pressure(&self) -> bool {
        self.default_pressure
    }
    pub fn default_height(&self) -> bool {
        self.default_height
    }
    pub fn quality_r(&self) -> f64 {
        self.quality_r
    }
    pub fn quality_r2(&self) -> f64 {
        self.quality_r2
    }
    pub fn r_std(&self) -> Option<f64> {
        self.r_std
    }
    pub fn window_fallback(&self) -> bool {
        self.window_fallback
    }
    pub fn error_code(&self) -> ErrorMask {
        self.error_code
    }
    pub fn error_string(&self) -> String {
        self.error_code.to_string()
    }
    pub fn is_valid_manual(&self) -> Option<bool> {
        self.is_valid_manual
    }

    /// Operator decision wins, otherwise any error bit or a fallback window makes the
    /// cycle invalid.
    pub fn is_valid(&self) -> bool {
        self.is_valid_manual.unwrap_or(self.error_code.is_empty() && !self.window_fallback)
    }

    /// None stores the default and flags it.
    pub fn set_air_temperature(&mut self, value: Option<f64>) -> Result<(), CycleError> {
        match value {
            None => {
                self.air_temperature = DEFAULT_TEMPERATURE;
                self.default_temperature = true;
            },
            Some(v) if !v.is_finite() => {
                return Err(CycleError::NotFinite { field: "air_temperature", value: v })
            },
            Some(v) => {
                self.air_temperature = v;
                self.default_temperature = false;
            },
        }
        Ok(())
    }

    pub fn set_air_pressure(&mut self, value: Option<f64>) -> Result<(), CycleError> {
        match value {
            None => {
                self.air_pressure = DEFAULT_PRESSURE;
                self.default_pressure = true;
            },
            Some(v) if !v.is_finite() => {
                return Err(CycleError::NotFinite { field: "air_pressure", value: v })
            },
            Some(v) => {
                self.air_pressure = v;
                self.default_pressure = false;
            },
        }
        Ok(())
    }

    pub fn set_chamber_height(&mut self, value: Option<f64>) -> Result<(), CycleError> {
        match value {
            None => {
                self.chamber_height = DEFAULT_HEIGHT;
                self.default_height = true;
            },
            Some(v) if !v.is_finite() => {
                return Err(CycleError::NotFinite { field: "chamber_height", value: v })
            },
            Some(v) if v <= 0.0 => return Err(CycleError::NonPositiveHeight(v)),
            Some(v) => {
                self.chamber_height = v;
                self.default_height = false;
            },
        }
        Ok(())
    }

    /// Operator verdict on the cycle. `None` hands validity back to the checks.
    pub fn set_is_valid_manual(&mut self, valid: Option<bool>) {
        self.is_valid_manual = valid;
        if valid.is_none() {
            self.error_code = ErrorMask::default();
        }
        self.classify();
    }

    fn apply_manual_validity(&mut self) {
        match self.is_valid_manual {
            Some(false) => self.error_code |= ErrorCode::ManualInvalid,
            Some(true) => self.error_code = ErrorMask::default(),
            None => {},
        }
    }

    /// Full recomputation: lag (unless already known), regression window and flux of
    /// every flux gas, then classification from a clean error code.
    pub fn get_max(&mut self, manual_lag: Option<i64>) {
        if self.data.is_empty() {
            tracing::debug!("no data for {}", self.definition);
            self.error_code = validation::check_valid_early(&self.snapshot());
            self.apply_manual_validity();
            return;
        }

        if let Some(lag) = manual_lag.filter(|lag| *lag != 0) {
            self.lagtime = lag;
            self.lag_computed = true;
        }
        if self.lagtime == 0 {
            self.get_lagtime();
        }
        self.has_errors = self.data.diag_sum(self.close(), self.open()) != 0;

        let optimizer = WindowOptimizer::new(self.config.optimizer);
        let lag_gas = self.instrument.lag_gas();
        let (close, open, start) = (self.close(), self.open(), self.start_ts());
        let mut lag_gas_rs = Vec::new();
        self.window_fallback = false;

        for &gas in self.instrument.flux_gases() {
            let fit = optimizer.optimize(&self.data, gas, close, open, start);
            let (offset_s, offset_e) = fit.offsets(start);
            self.window_fallback |= fit.fallback;

            let res = self.results.entry(gas).or_default();
            res.r = fit.r;
            res.r2 = fit.r * fit.r;
            res.calc_offset_s = offset_s;
            res.calc_offset_e = offset_e;
            if gas == lag_gas {
                lag_gas_rs = fit.candidate_rs;
            }
            self.compute_flux(gas);
        }
        self.r_std = population_std(&lag_gas_rs);

        self.error_code = ErrorMask::default();
        self.classify();
    }

    pub fn manual_lag(&mut self, lag: i64) {
        self.get_max(Some(lag));
    }

    /// Runs the lag search once. Repeated calls do nothing until [`Cycle::del_lagtime`].
    pub fn get_lagtime(&mut self) {
        if self.lag_computed {
            return;
        }
        self.lag_computed = true;
        let detector = LagDetector::new(self.config.lag);
        self.lagtime = detector.detect(&self.data, self.instrument.lag_gas(), self.og_open());
        tracing::debug!("lag for {}: {}", self.definition, self.lagtime);
    }

    pub fn del_lagtime(&mut self) {
        self.lagtime = 0;
        self.lag_computed = false;
    }

    /// Lag search from scratch followed by [`Cycle::get_max`].
    pub fn recalc(&mut self) {
        self.del_lagtime();
        self.get_max(None);
    }

    /// Recomputes slope, flux and fit of `gas` over its current regression window.
    pub fn calculate_flux(&mut self, gas: GasType) -> Result<(), CycleError> {
        self.require_flux_gas(gas)?;
        self.compute_flux(gas);
        Ok(())
    }

    pub fn calculate_fluxes(&mut self) {
        for &gas in self.instrument.flux_gases() {
            self.compute_flux(gas);
        }
        self.updated_height = false;
    }

    fn compute_flux(&mut self, gas: GasType) {
        let start = self.start_ts();
        let res = self.results.get(&gas).copied().unwrap_or_default();
        let points = self.data.valid_points(
            gas,
            start + res.calc_offset_s,
            start + res.calc_offset_e + 1,
        );
        let fit = LinearFit::from_points(&points);

        let mut flux = calculate_gas_flux(
            gas,
            fit.slope,
            self.chamber_height,
            self.air_temperature,
            self.air_pressure,
        );
        if self.has_errors {
            flux = 0.0;
        }

        let res = self.results.entry(gas).or_default();
        res.slope = round_to(fit.slope, crate::constants::ROUND_DECIMALS);
        res.flux = round_to(flux, crate::constants::ROUND_DECIMALS);
        res.r = fit.r;
        res.r2 = fit.r2;

        if gas == self.instrument.lag_gas() {
            let (x, y): (Vec<f64>, Vec<f64>) = self
                .data
                .valid_points(gas, self.close(), self.open())
                .into_iter()
                .map(|(t, v)| ((t - start) as f64, v))
                .unzip();
            self.quality_r = pearson_correlation(&x, &y).unwrap_or(0.0);
            self.quality_r2 = self.quality_r * self.quality_r;
        }
    }

    /// Manual regression window edit. Offsets are clamped to the closed period.
    pub fn set_calc_window(
        &mut self,
        gas: GasType,
        start_offset: i64,
        end_offset: i64,
    ) -> Result<(), CycleError> {
        self.require_flux_gas(gas)?;
        let lo = self.close() - self.start_ts();
        let hi = self.open() - self.start_ts();
        let s = start_offset.clamp(lo, hi);
        let e = end_offset.clamp(lo, hi);
        if s >= e {
            return Err(CycleError::BadWindow { start: start_offset, end: end_offset });
        }

        let res = self.results.entry(gas).or_default();
        res.calc_offset_s = s;
        res.calc_offset_e = e;
        self.compute_flux(gas);
        Ok(())
    }

    /// Moves the end of the cycle by `delta` seconds, reloads the samples and reruns the
    /// checks.
    pub fn nudge_end<T: TimeSeriesProvider + ?Sized>(
        &mut self,
        delta: i64,
        provider: &T,
    ) -> Result<(), CycleError> {
        let definition = self.definition.with_end_offset(self.definition.end_offset() + delta)?;
        let data = GasData::load(
            provider,
            &self.instrument.serial,
            definition.start_time(),
            definition.end_time(),
        )?;
        self.definition = definition;
        self.data = data;
        self.classify();
        Ok(())
    }

    /// ORs the current check results into the error code.
    pub fn classify(&mut self) {
        let mask = validation::classify(&self.snapshot(), &self.config.validation);
        self.error_code |= mask;
        self.apply_manual_validity();
    }

    fn snapshot(&self) -> ValiditySnapshot<'_> {
        let start = self.start_ts();
        ValiditySnapshot {
            data: &self.data,
            close: self.close(),
            open: self.open(),
            end: self.end(),
            lag_gas: self.instrument.lag_gas(),
            flux_windows: self
                .instrument
                .flux_gases()
                .iter()
                .map(|gas| {
                    let res = self.results.get(gas).copied().unwrap_or_default();
                    (*gas, start + res.calc_offset_s, start + res.calc_offset_e)
                })
                .collect(),
            default_temperature: self.default_temperature,
            default_pressure: self.default_pressure,
            r_std: self.r_std,
        }
    }

    fn require_flux_gas(&self, gas: GasType) -> Result<(), CycleError> {
        if self.instrument.flux_gases().contains(&gas) {
            Ok(())
        } else {
            Err(CycleError::NotFluxGas { gas, model: self.instrument.model })
        }
    }

    pub fn attribute_row(&self) -> FluxRow {
        FluxRow {
            start_time: self.start_time(),
            chamber_id: self.definition.chamber_id().to_owned(),
            instrument_serial: self.instrument.serial.clone(),
            instrument_model: self.instrument.model,
            close_offset: self.definition.close_offset(),
            open_offset: self.definition.open_offset(),
            end_offset: self.definition.end_offset(),
            lagtime: self.lagtime,
            air_temperature: self.air_temperature,
            air_pressure: self.air_pressure,
            chamber_height: self.chamber_height,
            default_temperature: self.default_temperature,
            default_pressure: self.default_pressure,
            default_height: self.default_height,
            quality_r: self.quality_r,
            quality_r2: self.quality_r2,
            is_valid: self.is_valid(),
            is_valid_manual: self.is_valid_manual,
            error_code: self.error_code.0,
            error_string: self.error_string(),
            updated_height: self.updated_height,
            window_fallback: self.window_fallback,
            results: self.results.clone(),
        }
    }

    pub fn attribute_dict(&self) -> Map<String, Value> {
        self.attribute_row().to_dict()
    }
}

/// Builds a freshly computed cycle: looks up meteo and chamber height, then runs the
/// full pipeline.
pub struct CycleBuilder {
    definition: CycleDefinition,
    instrument: Instrument,
    data: Option<GasData>,
    meteo_source: Option<String>,
    config: CycleConfig,
}

impl CycleBuilder {
    pub fn new(definition: CycleDefinition, instrument: Instrument) -> Self {
        Self {
            definition,
            instrument,
            data: None,
            meteo_source: None,
            config: CycleConfig::default(),
        }
    }

    pub fn data(mut self, data: GasData) -> Self {
        self.data = Some(data);
        self
    }

    /// Loads the samples of `[start, end)` from `provider`.
    pub fn fetch_data<T: TimeSeriesProvider + ?Sized>(
        mut self,
        provider: &T,
    ) -> Result<Self, QueryError> {
        self.data = Some(GasData::load(
            provider,
            &self.instrument.serial,
            self.definition.start_time(),
            self.definition.end_time(),
        )?);
        Ok(self)
    }

    pub fn meteo_source(mut self, source: Option<String>) -> Self {
        self.meteo_source = source;
        self
    }

    pub fn config(mut self, config: CycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build<E: EnvironmentProvider + ?Sized>(self, env: &E) -> Result<Cycle, CycleError> {
        let start = self.definition.start_time();
        let meteo = env.nearest_meteo(start, self.meteo_source.as_deref())?;
        let height = env.nearest_volume(start, self.definition.chamber_id())?;

        let mut cycle = Cycle::new(
            self.definition,
            self.instrument,
            self.data.unwrap_or_default(),
            self.config,
        );
        cycle.set_air_temperature(meteo.map(|(t, _)| t))?;
        cycle.set_air_pressure(meteo.map(|(_, p)| p))?;
        cycle.set_chamber_height(height)?;
        cycle.get_max(None);
        Ok(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_formats::gasdata::{GasDataSet, GasSample};
    use crate::data_formats::Environment;
    use crate::instruments::InstrumentType;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    const START: i64 = 1_718_186_400; // 2024-06-12 10:00:00 UTC
    const CLOSE: i64 = START + 60;
    const OPEN: i64 = START + 700;

    fn definition() -> CycleDefinition {
        let start = Utc.timestamp_opt(START, 0).unwrap();
        CycleDefinition::new("5", start, 60, 700, 900).unwrap()
    }

    fn instrument() -> Instrument {
        Instrument::new(InstrumentType::LI7810, "TG10-01169")
    }

    fn env() -> Environment {
        let mut env = Environment::default();
        env.meteo.push(START - 300, "station", 10.0, 1000.0);
        env.height.push(START - 86_400, "5", 1.0);
        env
    }

    /// CH4 from 2 ppm to 10 ppm while closed, CO2 rising 0.5 ppm/s, venting after open
    fn ch4_ramp(t: i64) -> Option<f64> {
        Some(if t < OPEN { 2000.0 + 12.5 * (t - CLOSE) as f64 } else { 1950.0 - (t - OPEN) as f64 })
    }

    fn co2_ramp(t: i64) -> Option<f64> {
        Some(match t {
            t if t < CLOSE => 420.0,
            t if t < OPEN => 420.0 + 0.5 * (t - CLOSE) as f64,
            t => 400.0 - 0.1 * (t - OPEN) as f64,
        })
    }

    fn gas_data(ch4: impl Fn(i64) -> Option<f64>) -> GasData {
        let samples: Vec<GasSample> = (START..START + 900)
            .map(|t| {
                GasSample::new(t)
                    .with_value(GasType::CH4, ch4(t))
                    .with_value(GasType::CO2, co2_ramp(t))
                    .with_value(GasType::H2O, Some(9000.0))
            })
            .collect();
        GasData::from_samples(&samples)
    }

    fn fresh(data: GasData, env: &Environment) -> Cycle {
        CycleBuilder::new(definition(), instrument()).data(data).build(env).unwrap()
    }

    #[test]
    fn linear_ch4_gives_formula_flux() {
        let cycle = fresh(gas_data(ch4_ramp), &env());
        let ch4 = cycle.result(GasType::CH4).unwrap();

        assert!(ch4.slope > 0.0);
        assert_relative_eq!(ch4.slope, 12.5, epsilon = 1e-6);
        let by_hand = (12.5 / 1000.0) * 3600.0 / 1e6 * 1.0 * (16.0 * 1000.0 * 100.0)
            / (8.314 * (10.0 + 273.15))
            * 1000.0;
        assert_relative_eq!(ch4.flux, by_hand, max_relative = 1e-8);
        assert_relative_eq!(ch4.r, 1.0, epsilon = 1e-9);
        assert!(!cycle.default_temperature() && !cycle.default_pressure());
        assert!(!cycle.window_fallback());
    }

    #[test]
    fn regression_window_inside_closed_period() {
        let cycle = fresh(gas_data(ch4_ramp), &env());
        for gas in [GasType::CH4, GasType::CO2] {
            let res = cycle.result(gas).unwrap();
            assert!(res.calc_offset_s >= cycle.close() - START);
            assert!(res.calc_offset_e < cycle.open() - START);
            assert!(res.calc_offset_e - res.calc_offset_s >= 119);
        }
    }

    #[test]
    fn null_window_gives_zero_flux() {
        let data = gas_data(|t| if (START + 200..=START + 400).contains(&t) { None } else { ch4_ramp(t) });
        let mut cycle = fresh(data, &env());
        cycle.set_calc_window(GasType::CH4, 200, 400).unwrap();

        let ch4 = cycle.result(GasType::CH4).unwrap();
        assert_eq!((ch4.flux, ch4.slope, ch4.r), (0.0, 0.0, 0.0));
        assert_eq!((ch4.calc_offset_s, ch4.calc_offset_e), (200, 400));
    }

    #[test]
    fn late_lag_peak_is_corrected() {
        // spike exactly 100 s after the scheduled open, real response 20 s before it
        let data = gas_data(|t| match t - OPEN {
            100 => Some(50_000.0),
            -20 => Some(20_000.0),
            _ => ch4_ramp(t),
        });
        let cycle = fresh(data, &env());
        assert!(cycle.lag_computed());
        assert_ne!(cycle.lagtime(), 100);
        assert_eq!(cycle.lagtime(), -20);
        assert_eq!(cycle.open(), OPEN - 20);
    }

    #[test]
    fn missing_meteo_flags_temperature() {
        let mut env = env();
        env.meteo = Default::default();
        let cycle = fresh(gas_data(ch4_ramp), &env);

        assert!(cycle.default_temperature());
        assert!(cycle.error_code().contains(ErrorCode::NoAirTemperature));
        assert!(!cycle.is_valid());
        assert!(cycle.error_string().contains("no air_temperature"));
        assert_eq!(cycle.air_temperature(), DEFAULT_TEMPERATURE);
        assert_eq!(cycle.air_pressure(), DEFAULT_PRESSURE);
    }

    #[test]
    fn missing_height_uses_default() {
        let mut env = env();
        env.height = Default::default();
        let cycle = fresh(gas_data(ch4_ramp), &env);
        assert!(cycle.default_height());
        assert_eq!(cycle.chamber_height(), 1.0);
    }

    #[test]
    fn no_data_only_sets_early_bits() {
        let cycle = CycleBuilder::new(definition(), instrument()).build(&env()).unwrap();
        assert_eq!(cycle.error_code().codes(), vec![ErrorCode::NoData]);
        assert!(!cycle.is_valid());
        assert_eq!(cycle.result(GasType::CO2).unwrap().flux, 0.0);
    }

    #[test]
    fn classification_never_drops_bits() {
        let mut env = env();
        env.meteo = Default::default();
        let mut cycle = fresh(gas_data(ch4_ramp), &env);
        let mut last = cycle.error_code().0;
        for _ in 0..3 {
            cycle.classify();
            let now = cycle.error_code().0;
            assert_eq!(now & last, last);
            last = now;
        }
    }

    #[test]
    fn manual_validity_overrides() {
        let mut cycle = fresh(gas_data(ch4_ramp), &env());
        cycle.set_is_valid_manual(Some(false));
        assert!(cycle.error_code().contains(ErrorCode::ManualInvalid));
        assert!(!cycle.is_valid());

        cycle.set_is_valid_manual(Some(true));
        assert_eq!(cycle.error_code(), ErrorMask(0));
        assert!(cycle.is_valid());

        // survives a recomputation
        cycle.recalc();
        assert_eq!(cycle.error_code(), ErrorMask(0));
        assert_eq!(cycle.attribute_row().is_valid_manual, Some(true));
    }

    #[test]
    fn cleared_override_restores_checks() {
        let mut env = env();
        env.meteo = Default::default();
        let mut cycle = fresh(gas_data(ch4_ramp), &env);
        cycle.set_is_valid_manual(Some(true));
        assert!(cycle.is_valid());

        cycle.set_is_valid_manual(None);
        assert_eq!(cycle.is_valid_manual(), None);
        assert!(cycle.error_code().contains(ErrorCode::NoAirTemperature));
        assert!(!cycle.error_code().contains(ErrorCode::ManualInvalid));
        assert!(!cycle.is_valid());
        assert_eq!(cycle.attribute_row().is_valid_manual, None);
    }

    #[test]
    fn setters_validate() {
        let mut cycle = fresh(gas_data(ch4_ramp), &env());
        assert!(matches!(
            cycle.set_air_pressure(Some(f64::NAN)),
            Err(CycleError::NotFinite { field: "air_pressure", .. })
        ));
        assert!(matches!(cycle.set_chamber_height(Some(0.0)), Err(CycleError::NonPositiveHeight(_))));
        assert!(cycle.set_air_temperature(Some(f64::INFINITY)).is_err());
        assert_eq!(cycle.air_temperature(), 10.0);

        cycle.set_air_temperature(None).unwrap();
        assert!(cycle.default_temperature());
        cycle.set_chamber_height(Some(0.4)).unwrap();
        assert!(!cycle.default_height());
    }

    #[test]
    fn height_change_scales_flux() {
        let mut cycle = fresh(gas_data(ch4_ramp), &env());
        let before = cycle.result(GasType::CH4).unwrap().flux;
        cycle.set_chamber_height(Some(0.5)).unwrap();
        cycle.calculate_flux(GasType::CH4).unwrap();
        assert_relative_eq!(cycle.result(GasType::CH4).unwrap().flux, before / 2.0, max_relative = 1e-8);
    }

    #[test]
    fn only_flux_gases_are_calculated() {
        let mut cycle = fresh(gas_data(ch4_ramp), &env());
        assert!(matches!(cycle.calculate_flux(GasType::H2O), Err(CycleError::NotFluxGas { .. })));
        assert!(cycle.set_calc_window(GasType::N2O, 100, 300).is_err());
    }

    #[test]
    fn calc_window_is_clamped() {
        let mut cycle = fresh(gas_data(ch4_ramp), &env());
        let lo = cycle.close() - START;
        let hi = cycle.open() - START;
        cycle.set_calc_window(GasType::CO2, -500, 5000).unwrap();
        let co2 = cycle.result(GasType::CO2).unwrap();
        assert_eq!((co2.calc_offset_s, co2.calc_offset_e), (lo, hi));
        assert!(matches!(
            cycle.set_calc_window(GasType::CO2, 400, 300),
            Err(CycleError::BadWindow { .. })
        ));
    }

    #[test]
    fn manual_lag_and_reset() {
        let mut cycle = fresh(gas_data(ch4_ramp), &env());
        cycle.manual_lag(15);
        assert_eq!(cycle.lagtime(), 15);
        assert_eq!(cycle.close(), CLOSE + 15);

        // computed flag keeps the manual value
        cycle.get_lagtime();
        assert_eq!(cycle.lagtime(), 15);

        cycle.del_lagtime();
        assert_eq!(cycle.lagtime(), 0);
        assert!(!cycle.lag_computed());
    }

    #[test]
    fn diagnostics_zero_the_flux() {
        let samples: Vec<GasSample> = (START..START + 900)
            .map(|t| {
                GasSample::new(t)
                    .with_value(GasType::CH4, ch4_ramp(t))
                    .with_value(GasType::CO2, co2_ramp(t))
                    .with_diag(if t == START + 300 { 1 } else { 0 })
            })
            .collect();
        let cycle = fresh(GasData::from_samples(&samples), &env());
        assert!(cycle.has_errors());
        assert_eq!(cycle.result(GasType::CH4).unwrap().flux, 0.0);
        assert!(cycle.result(GasType::CH4).unwrap().slope > 0.0);
        assert!(cycle.error_code().contains(ErrorCode::HasErrors));
    }

    #[test]
    fn nudge_end_reloads_and_keeps_invariant() {
        let mut provider = GasDataSet::default();
        let samples: Vec<GasSample> = (START..START + 1200)
            .map(|t| GasSample::new(t).with_value(GasType::CH4, ch4_ramp(t)).with_value(GasType::CO2, co2_ramp(t)))
            .collect();
        provider.insert("TG10-01169".into(), GasData::from_samples(&samples));

        let mut cycle = CycleBuilder::new(definition(), instrument())
            .fetch_data(&provider)
            .unwrap()
            .build(&env())
            .unwrap();
        assert_eq!(cycle.data().len(), 900);

        cycle.nudge_end(60, &provider).unwrap();
        assert_eq!(cycle.definition().end_offset(), 960);
        assert_eq!(cycle.data().len(), 960);

        assert!(cycle.nudge_end(-300, &provider).is_err());
        assert_eq!(cycle.definition().end_offset(), 960);
    }

    #[test]
    fn rehydrated_cycle_matches() {
        let cycle = fresh(gas_data(ch4_ramp), &env());
        let row = cycle.attribute_row();
        let back = Cycle::from_row(&row, gas_data(ch4_ramp), CycleConfig::default()).unwrap();

        assert_eq!(back.attribute_row(), row);
        assert!(back.lag_computed());
    }

    #[test]
    fn stale_height_recomputes_flux() {
        let cycle = fresh(gas_data(ch4_ramp), &env());
        let mut row = cycle.attribute_row();
        let flux = row.results[&GasType::CH4].flux;
        row.updated_height = true;
        row.chamber_height = 0.25;

        let back = Cycle::from_row(&row, gas_data(ch4_ramp), CycleConfig::default()).unwrap();
        let new = back.attribute_row();
        assert!(!new.updated_height);
        assert_relative_eq!(new.results[&GasType::CH4].flux, flux / 4.0, max_relative = 1e-8);
        assert_eq!(new.lagtime, row.lagtime);
    }

    #[test]
    fn dict_uses_gas_columns() {
        let cycle = fresh(gas_data(ch4_ramp), &env());
        let dict = cycle.attribute_dict();
        assert_eq!(dict["chamber_id"], Value::from("5"));
        assert!(dict.contains_key("co2_flux"));
        assert!(dict.contains_key("ch4_r2"));
        assert!(!dict.contains_key("n2o_flux"));
    }
}
