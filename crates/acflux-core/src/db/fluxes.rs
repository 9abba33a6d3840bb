use crate::cycle::record::{FluxRow, GasResult};
use crate::db::fluxes_schema::{fluxes_col, fluxes_columns};
use crate::error::QueryError;
use crate::gastype::GasType;
use crate::instruments::InstrumentType;
use crate::traits::PersistenceGateway;
use crate::utils::utc_from_ts;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

fn upsert_sql() -> String {
    let cols = fluxes_columns();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = cols
        .iter()
        .filter(|c| !matches!(c.as_str(), "start_time" | "chamber_id" | "instrument_serial"))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    format!(
        "INSERT INTO fluxes ({}) VALUES ({})
         ON CONFLICT(start_time, chamber_id, instrument_serial) DO UPDATE SET {}",
        cols.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

fn select_sql() -> String {
    format!("SELECT {} FROM fluxes", fluxes_columns().join(", "))
}

fn bool_value(b: bool) -> Value {
    Value::Integer(b as i64)
}

/// Column values of `row` in [`fluxes_columns`] order. Gases the instrument has no flux
/// for are stored as NULL.
fn row_values(row: &FluxRow) -> Vec<Value> {
    let mut values = vec![
        Value::Integer(row.start_time.timestamp()),
        Value::Text(row.chamber_id.clone()),
        Value::Text(row.instrument_serial.clone()),
        Value::Text(row.instrument_model.to_string()),
        Value::Integer(row.close_offset),
        Value::Integer(row.open_offset),
        Value::Integer(row.end_offset),
        Value::Integer(row.lagtime),
        Value::Real(row.air_temperature),
        Value::Real(row.air_pressure),
        Value::Real(row.chamber_height),
        bool_value(row.default_temperature),
        bool_value(row.default_pressure),
        bool_value(row.default_height),
        Value::Real(row.quality_r),
        Value::Real(row.quality_r2),
        bool_value(row.is_valid),
        row.is_valid_manual.map_or(Value::Null, bool_value),
        Value::Integer(row.error_code as i64),
        Value::Text(row.error_string.clone()),
        bool_value(row.updated_height),
        bool_value(row.window_fallback),
    ];
    for gas in GasType::FLUX_COLUMNS {
        match row.results.get(&gas) {
            Some(res) => values.extend([
                Value::Real(res.slope),
                Value::Real(res.flux),
                Value::Real(res.r),
                Value::Real(res.r2),
                Value::Integer(res.calc_offset_s),
                Value::Integer(res.calc_offset_e),
            ]),
            None => values.extend(std::iter::repeat(Value::Null).take(fluxes_col::GAS_STRIDE)),
        }
    }
    values
}

fn row_to_flux(row: &Row) -> rusqlite::Result<FluxRow> {
    use fluxes_col::*;

    let ts: i64 = row.get(START_TIME)?;
    let start_time: DateTime<Utc> =
        utc_from_ts(ts).ok_or(rusqlite::Error::IntegralValueOutOfRange(START_TIME, ts))?;
    let model_str: String = row.get(INSTRUMENT_MODEL)?;
    let instrument_model = model_str.parse::<InstrumentType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(INSTRUMENT_MODEL, Type::Text, Box::new(e))
    })?;

    let mut results = BTreeMap::new();
    for (i, gas) in GasType::FLUX_COLUMNS.iter().enumerate() {
        if !instrument_model.flux_gases().contains(gas) {
            continue;
        }
        let base = GAS_BASE + i * GAS_STRIDE;
        let Some(slope) = row.get::<_, Option<f64>>(base)? else {
            continue;
        };
        results.insert(
            *gas,
            GasResult {
                slope,
                flux: row.get::<_, Option<f64>>(base + 1)?.unwrap_or(0.0),
                r: row.get::<_, Option<f64>>(base + 2)?.unwrap_or(0.0),
                r2: row.get::<_, Option<f64>>(base + 3)?.unwrap_or(0.0),
                calc_offset_s: row.get::<_, Option<i64>>(base + 4)?.unwrap_or(0),
                calc_offset_e: row.get::<_, Option<i64>>(base + 5)?.unwrap_or(0),
            },
        );
    }

    Ok(FluxRow {
        start_time,
        chamber_id: row.get(CHAMBER_ID)?,
        instrument_serial: row.get(INSTRUMENT_SERIAL)?,
        instrument_model,
        close_offset: row.get(CLOSE_OFFSET)?,
        open_offset: row.get(OPEN_OFFSET)?,
        end_offset: row.get(END_OFFSET)?,
        lagtime: row.get(LAGTIME)?,
        air_temperature: row.get(AIR_TEMPERATURE)?,
        air_pressure: row.get(AIR_PRESSURE)?,
        chamber_height: row.get(CHAMBER_HEIGHT)?,
        default_temperature: row.get(DEFAULT_TEMPERATURE)?,
        default_pressure: row.get(DEFAULT_PRESSURE)?,
        default_height: row.get(DEFAULT_HEIGHT)?,
        quality_r: row.get::<_, Option<f64>>(QUALITY_R)?.unwrap_or(0.0),
        quality_r2: row.get::<_, Option<f64>>(QUALITY_R2)?.unwrap_or(0.0),
        is_valid: row.get(IS_VALID)?,
        is_valid_manual: row.get(IS_VALID_MANUAL)?,
        error_code: row.get(ERROR_CODE)?,
        error_string: row.get(ERROR_STRING)?,
        updated_height: row.get(UPDATED_HEIGHT)?,
        window_fallback: row.get(WINDOW_FALLBACK)?,
        results,
    })
}

impl PersistenceGateway for Connection {
    fn upsert(&self, row: &FluxRow) -> Result<(), QueryError> {
        let mut stmt = self.prepare_cached(&upsert_sql())?;
        stmt.execute(params_from_iter(row_values(row)))?;
        Ok(())
    }

    /// All rows in one transaction, nothing is written if any row fails.
    fn upsert_many(&self, rows: &[FluxRow]) -> Result<usize, QueryError> {
        let tx = self.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&upsert_sql())?;
            for row in rows {
                stmt.execute(params_from_iter(row_values(row)))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn get(&self, start_time: DateTime<Utc>, serial: &str) -> Result<Option<FluxRow>, QueryError> {
        let sql = format!(
            "{} WHERE start_time = ?1 AND instrument_serial = ?2 ORDER BY chamber_id LIMIT 1",
            select_sql()
        );
        let row = self
            .query_row(&sql, params![start_time.timestamp(), serial], row_to_flux)
            .optional()?;
        Ok(row)
    }

    fn get_cycle(
        &self,
        start_time: DateTime<Utc>,
        chamber_id: &str,
        serial: &str,
    ) -> Result<Option<FluxRow>, QueryError> {
        let sql = format!(
            "{} WHERE start_time = ?1 AND chamber_id = ?2 AND instrument_serial = ?3",
            select_sql()
        );
        let row = self
            .query_row(&sql, params![start_time.timestamp(), chamber_id, serial], row_to_flux)
            .optional()?;
        Ok(row)
    }

    fn range_query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        chamber_ids: &[String],
        is_valid: Option<bool>,
        serial: Option<&str>,
    ) -> Result<Vec<FluxRow>, QueryError> {
        let mut sql = format!(
            "{} WHERE start_time >= ?1 AND start_time < ?2
               AND (?3 IS NULL OR is_valid = ?3)
               AND (?4 IS NULL OR instrument_serial = ?4)",
            select_sql()
        );
        let mut values = vec![
            Value::Integer(start.timestamp()),
            Value::Integer(end.timestamp()),
            is_valid.map_or(Value::Null, bool_value),
            serial.map_or(Value::Null, |s| Value::Text(s.to_owned())),
        ];
        if !chamber_ids.is_empty() {
            let placeholders: Vec<String> =
                (0..chamber_ids.len()).map(|i| format!("?{}", values.len() + i + 1)).collect();
            sql.push_str(&format!(" AND chamber_id IN ({})", placeholders.join(", ")));
            values.extend(chamber_ids.iter().map(|c| Value::Text(c.clone())));
        }
        sql.push_str(" ORDER BY start_time, chamber_id, instrument_serial");

        let mut stmt = self.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_flux)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Flags every stored row of `chamber_id` covered by the height measured at `datetime`
/// as stale and stores the new height. A measurement covers rows up to the next
/// measurement of the same chamber, or all later rows when there is none.
pub fn mark_height_updated(
    conn: &Connection,
    chamber_id: &str,
    datetime: i64,
    height: f64,
) -> Result<usize, QueryError> {
    let next: Option<i64> = conn.query_row(
        "SELECT MIN(datetime) FROM height WHERE chamber_id = ?1 AND datetime > ?2",
        params![chamber_id, datetime],
        |row| row.get(0),
    )?;
    let marked = conn.execute(
        "UPDATE fluxes
         SET updated_height = 1, chamber_height = ?3, default_height = 0
         WHERE chamber_id = ?1
           AND start_time >= ?2
           AND (?4 IS NULL OR start_time < ?4)",
        params![chamber_id, datetime, height, next],
    )?;
    if marked > 0 {
        tracing::debug!("marked {} flux rows of chamber {} with height {}", marked, chamber_id, height);
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_formats::heightdata::{insert_height_data, HeightData};
    use crate::db::fluxes_schema::initiate_tables;
    use chrono::TimeZone;

    fn db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initiate_tables(&conn).unwrap();
        conn
    }

    fn row(hour: u32, chamber: &str, serial: &str, valid: bool) -> FluxRow {
        let mut results = BTreeMap::new();
        results.insert(
            GasType::CO2,
            GasResult { slope: 0.25, flux: 12.5, r: 0.99, r2: 0.9801, calc_offset_s: 75, calc_offset_e: 390 },
        );
        results.insert(
            GasType::CH4,
            GasResult { slope: 0.0125, flux: 0.03, r: 0.95, r2: 0.9025, calc_offset_s: 90, calc_offset_e: 300 },
        );
        FluxRow {
            start_time: Utc.with_ymd_and_hms(2024, 6, 12, hour, 0, 0).unwrap(),
            chamber_id: chamber.into(),
            instrument_serial: serial.into(),
            instrument_model: InstrumentType::LI7810,
            close_offset: 60,
            open_offset: 700,
            end_offset: 900,
            lagtime: 12,
            air_temperature: 14.2,
            air_pressure: 1003.5,
            chamber_height: 0.6,
            default_temperature: false,
            default_pressure: false,
            default_height: false,
            quality_r: 0.97,
            quality_r2: 0.9409,
            is_valid: valid,
            is_valid_manual: None,
            error_code: if valid { 0 } else { 4 },
            error_string: if valid { String::new() } else { "no air_temperature".into() },
            updated_height: false,
            window_fallback: false,
            results,
        }
    }

    #[test]
    fn upsert_then_get() {
        let conn = db();
        let r = row(10, "3", "TG10-01169", true);
        conn.upsert(&r).unwrap();
        let back = conn.get(r.start_time, "TG10-01169").unwrap().unwrap();
        assert_eq!(back, r);
        assert!(conn.get(r.start_time, "TG20-01072").unwrap().is_none());
    }

    #[test]
    fn get_cycle_keys_on_chamber() {
        let conn = db();
        let mut second = row(10, "2", "TG10-01169", true);
        second.lagtime = 30;
        conn.upsert_many(&[row(10, "1", "TG10-01169", true), second.clone()]).unwrap();

        let back = conn.get_cycle(second.start_time, "2", "TG10-01169").unwrap().unwrap();
        assert_eq!(back, second);
        assert_eq!(conn.get_cycle(second.start_time, "1", "TG10-01169").unwrap().unwrap().lagtime, 12);
        assert!(conn.get_cycle(second.start_time, "3", "TG10-01169").unwrap().is_none());
        assert!(conn.get_cycle(second.start_time, "2", "TG20-01072").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces() {
        let conn = db();
        let mut r = row(10, "3", "TG10-01169", true);
        conn.upsert(&r).unwrap();
        r.lagtime = -4;
        r.is_valid_manual = Some(false);
        conn.upsert(&r).unwrap();

        let n: i64 = conn.query_row("SELECT COUNT(*) FROM fluxes", [], |row| row.get(0)).unwrap();
        assert_eq!(n, 1);
        let back = conn.get(r.start_time, "TG10-01169").unwrap().unwrap();
        assert_eq!(back.lagtime, -4);
        assert_eq!(back.is_valid_manual, Some(false));
    }

    #[test]
    fn non_flux_gases_stay_null() {
        let conn = db();
        conn.upsert(&row(10, "3", "TG10-01169", true)).unwrap();
        let n2o: Option<f64> =
            conn.query_row("SELECT n2o_flux FROM fluxes", [], |row| row.get(0)).unwrap();
        assert_eq!(n2o, None);
    }

    #[test]
    fn range_query_filters() {
        let conn = db();
        let rows = vec![
            row(8, "1", "TG10-01169", true),
            row(9, "2", "TG10-01169", false),
            row(10, "1", "TG10-01169", true),
            row(11, "1", "TG10-02000", true),
            row(12, "1", "TG10-01169", true),
        ];
        assert_eq!(conn.upsert_many(&rows).unwrap(), 5);

        let start = Utc.with_ymd_and_hms(2024, 6, 12, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();

        let all = conn.range_query(start, end, &[], None, None).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].start_time <= w[1].start_time));

        let valid = conn.range_query(start, end, &[], Some(true), None).unwrap();
        assert_eq!(valid.len(), 3);

        let chamber = conn.range_query(start, end, &["2".to_owned()], None, None).unwrap();
        assert_eq!(chamber.len(), 1);
        assert!(!chamber[0].is_valid);

        let serial = conn
            .range_query(start, end, &["1".to_owned(), "2".to_owned()], Some(true), Some("TG10-02000"))
            .unwrap();
        assert_eq!(serial.len(), 1);
        assert_eq!(serial[0].chamber_id, "1");
    }

    #[test]
    fn height_marks_until_next_measurement() {
        let conn = db();
        let rows: Vec<FluxRow> = (8..14).map(|h| row(h, "1", "TG10-01169", true)).collect();
        conn.upsert_many(&rows).unwrap();
        conn.upsert(&row(9, "2", "TG10-01169", true)).unwrap();

        let at = |h: u32| Utc.with_ymd_and_hms(2024, 6, 12, h, 0, 0).unwrap().timestamp();
        let mut later = HeightData::default();
        later.push(at(12), "1", 0.9);
        insert_height_data(&conn, &later).unwrap();

        // 09:30 covers 10:00 and 11:00, 12:00 already has its own height
        let mut heights = HeightData::default();
        heights.push(at(9) + 1800, "1", 0.45);
        let (inserted, marked) = insert_height_data(&conn, &heights).unwrap();
        assert_eq!((inserted, marked), (1, 2));

        let start = Utc.with_ymd_and_hms(2024, 6, 12, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 13, 0, 0, 0).unwrap();
        let stored = conn.range_query(start, end, &["1".to_owned()], None, None).unwrap();
        let stale: Vec<(u32, f64)> = stored
            .iter()
            .filter(|r| r.updated_height)
            .map(|r| (r.start_time.format("%H").to_string().parse().unwrap(), r.chamber_height))
            .collect();
        assert_eq!(stale, vec![(10, 0.45), (11, 0.45), (12, 0.9), (13, 0.9)]);

        let other = conn.range_query(start, end, &["2".to_owned()], None, None).unwrap();
        assert!(!other[0].updated_height);
        assert_eq!(other[0].chamber_height, 0.6);
    }
}
