use crate::cycle::record::FluxRow;
use crate::db::fluxes_schema::fluxes_columns;

use serde_json::Value;
use std::io::Write;

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

/// Writes `rows` as csv with the fluxes table columns as header. Gas columns an
/// instrument has no flux for are left empty. Returns the number of rows written.
pub fn write_flux_csv<W: Write>(writer: W, rows: &[FluxRow]) -> Result<usize, csv::Error> {
    let columns = fluxes_columns();
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&columns)?;
    for row in rows {
        let dict = row.to_dict();
        wtr.write_record(columns.iter().map(|c| cell(dict.get(c))))?;
    }
    wtr.flush()?;
    Ok(rows.len())
}
