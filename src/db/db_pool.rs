use duckdb::{AccessMode, Config, Connection};
use r2d2::ManageConnection;

/// Hands out DuckDB connections opened in `READ_ONLY` access mode with
/// external access disabled. Writes to the database file are rejected, and
/// so is anything touching the filesystem or network (`COPY ... TO`,
/// `read_csv`, `ATTACH`, extension installs).
pub struct DuckDBConnectionManager {
    connection_string: String,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let config = Config::default()
            .access_mode(AccessMode::ReadOnly)?
            .enable_external_access(false)?;
        Connection::open_with_flags(&self.connection_string, config)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
