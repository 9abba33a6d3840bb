use crate::db::fluxes_schema::DB_VERSION;
use rusqlite::{Connection, OptionalExtension, Result};

/// Brings an older database file up to [`DB_VERSION`]. Returns the number of steps
/// applied. A file without a fluxes table is left for `initiate_tables`.
pub fn migrate_db(conn: &Connection) -> Result<usize> {
    if !table_exists(conn, "fluxes")? {
        return Ok(0);
    }

    // user_version is 0 by default in SQLite
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let mut migrated_steps = 0;

    // v2: stale height and fallback window flags
    if version < 2 {
        if !column_exists(conn, "fluxes", "updated_height")? {
            tracing::info!("Applying migration v2: add fluxes.updated_height");
            conn.execute(
                "ALTER TABLE fluxes ADD COLUMN updated_height BOOL NOT NULL DEFAULT 0;",
                [],
            )?;
        }
        if !column_exists(conn, "fluxes", "window_fallback")? {
            tracing::info!("Applying migration v2: add fluxes.window_fallback");
            conn.execute(
                "ALTER TABLE fluxes ADD COLUMN window_fallback BOOL NOT NULL DEFAULT 0;",
                [],
            )?;
        }
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_fluxes_chamber_start ON fluxes (chamber_id, start_time);",
            [],
        )?;

        migrated_steps += 1;
    }

    // Only bump user_version once, at the end, to the *latest* schema version
    if migrated_steps > 0 {
        tracing::info!("Setting PRAGMA user_version = {}", DB_VERSION);
        conn.execute(&format!("PRAGMA user_version = {};", DB_VERSION), [])?;
    }

    Ok(migrated_steps)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1;",
        [table],
        |_| Ok(true),
    )
    .optional()
    .map(|opt| opt.unwrap_or(false))
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    // the table name has to be a literal in the pragma call
    fn esc(s: &str) -> String {
        s.replace('\'', "''")
    }

    let sql = format!("SELECT 1 FROM pragma_table_info('{}') WHERE name = ?1 LIMIT 1;", esc(table));
    conn.query_row(&sql, [column], |_| Ok(true)).optional().map(|opt| opt.unwrap_or(false))
}
