use crate::cycle::definition::CycleDefinition;
use crate::error::DefinitionError;
use crate::gastype::GasType;
use crate::instruments::InstrumentType;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Regression outcome of one flux gas. Offsets are seconds from the cycle start.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GasResult {
    pub slope: f64,
    pub flux: f64,
    pub r: f64,
    pub r2: f64,
    pub calc_offset_s: i64,
    pub calc_offset_e: i64,
}

/// Everything persisted about one computed cycle, one row of the `fluxes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxRow {
    pub start_time: DateTime<Utc>,
    pub chamber_id: String,
    pub instrument_serial: String,
    pub instrument_model: InstrumentType,
    pub close_offset: i64,
    pub open_offset: i64,
    pub end_offset: i64,
    pub lagtime: i64,
    pub air_temperature: f64,
    pub air_pressure: f64,
    pub chamber_height: f64,
    pub default_temperature: bool,
    pub default_pressure: bool,
    pub default_height: bool,
    pub quality_r: f64,
    pub quality_r2: f64,
    pub is_valid: bool,
    pub is_valid_manual: Option<bool>,
    pub error_code: u16,
    pub error_string: String,
    /// chamber height changed after the row was computed
    pub updated_height: bool,
    pub window_fallback: bool,
    pub results: BTreeMap<GasType, GasResult>,
}

impl FluxRow {
    pub fn definition(&self) -> Result<CycleDefinition, DefinitionError> {
        CycleDefinition::new(
            self.chamber_id.clone(),
            self.start_time,
            self.close_offset,
            self.open_offset,
            self.end_offset,
        )
    }

    pub fn result(&self, gas: GasType) -> Option<&GasResult> {
        self.results.get(&gas)
    }

    /// Flat column name to value map, per gas results as `ch4_flux`, `co2_r2` etc.
    pub fn to_dict(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("start_time".into(), json!(self.start_time.to_rfc3339()));
        map.insert("chamber_id".into(), json!(self.chamber_id));
        map.insert("instrument_serial".into(), json!(self.instrument_serial));
        map.insert("instrument_model".into(), json!(self.instrument_model.to_string()));
        map.insert("close_offset".into(), json!(self.close_offset));
        map.insert("open_offset".into(), json!(self.open_offset));
        map.insert("end_offset".into(), json!(self.end_offset));
        map.insert("lagtime".into(), json!(self.lagtime));
        map.insert("air_temperature".into(), json!(self.air_temperature));
        map.insert("air_pressure".into(), json!(self.air_pressure));
        map.insert("chamber_height".into(), json!(self.chamber_height));
        map.insert("default_temperature".into(), json!(self.default_temperature));
        map.insert("default_pressure".into(), json!(self.default_pressure));
        map.insert("default_height".into(), json!(self.default_height));
        map.insert("quality_r".into(), json!(self.quality_r));
        map.insert("quality_r2".into(), json!(self.quality_r2));
        map.insert("is_valid".into(), json!(self.is_valid));
        map.insert("is_valid_manual".into(), json!(self.is_valid_manual));
        map.insert("error_code".into(), json!(self.error_code));
        map.insert("error_string".into(), json!(self.error_string));
        map.insert("updated_height".into(), json!(self.updated_height));
        map.insert("window_fallback".into(), json!(self.window_fallback));

        for (gas, res) in &self.results {
            map.insert(gas.slope_col(), json!(res.slope));
            map.insert(gas.flux_col(), json!(res.flux));
            map.insert(gas.r_col(), json!(res.r));
            map.insert(gas.r2_col(), json!(res.r2));
            map.insert(gas.calc_offset_s_col(), json!(res.calc_offset_s));
            map.insert(gas.calc_offset_e_col(), json!(res.calc_offset_e));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> FluxRow {
        let mut results = BTreeMap::new();
        results.insert(
            GasType::CH4,
            GasResult { slope: 0.01, flux: 0.02, r: 0.9, r2: 0.81, calc_offset_s: 120, calc_offset_e: 400 },
        );
        FluxRow {
            start_time: Utc.with_ymd_and_hms(2024, 6, 12, 10, 0, 0).unwrap(),
            chamber_id: "3".into(),
            instrument_serial: "TG10-01169".into(),
            instrument_model: InstrumentType::LI7810,
            close_offset: 60,
            open_offset: 700,
            end_offset: 900,
            lagtime: 12,
            air_temperature: 10.0,
            air_pressure: 1000.0,
            chamber_height: 1.0,
            default_temperature: true,
            default_pressure: true,
            default_height: false,
            quality_r: 0.8,
            quality_r2: 0.64,
            is_valid: false,
            is_valid_manual: None,
            error_code: 12,
            error_string: "no air_temperature, no air_pressure".into(),
            updated_height: false,
            window_fallback: false,
            results,
        }
    }

    #[test]
    fn dict_has_flat_gas_columns() {
        let dict = row().to_dict();
        assert_eq!(dict["ch4_r"], json!(0.9));
        assert_eq!(dict["ch4_r2"], json!(0.81));
        assert_eq!(dict["ch4_calc_offset_e"], json!(400));
        assert_eq!(dict["instrument_model"], json!("LI-7810"));
        assert_eq!(dict["is_valid_manual"], Value::Null);
        assert!(!dict.contains_key("co2_flux"));
    }

    #[test]
    fn row_survives_json() {
        let row = row();
        let text = serde_json::to_string(&row).unwrap();
        let back: FluxRow = serde_json::from_str(&text).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn definition_from_row() {
        let def = row().definition().unwrap();
        assert_eq!(def.chamber_id(), "3");
        assert_eq!(def.open_offset(), 700);
    }
}
