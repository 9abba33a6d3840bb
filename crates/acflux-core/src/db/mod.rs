pub mod fluxes;
pub mod fluxes_schema;
pub mod migrate;

use crate::error::QueryError;
use rusqlite::Connection;
use std::path::Path;

/// Opens the database file, migrates older schemas and creates missing tables.
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<Connection, QueryError> {
    let conn = Connection::open(path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    let steps = migrate::migrate_db(&conn)?;
    if steps > 0 {
        tracing::info!("applied {} schema migration(s)", steps);
    }
    fluxes_schema::initiate_tables(&conn)?;
    Ok(conn)
}
