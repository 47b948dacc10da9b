/// Logic related to database logistics; creating the database file, running migrations, etc.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::{Sqlite, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::debug;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

const BUSY_TIMEOUT_SECONDS: u64 = 5;

const DB_FILENAME: &str = "sqlite.simtrials.db";

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug)]
pub struct ConnectionOptions {
    pub enable_wal: bool,
    pub enable_foreign_keys: bool,
    pub busy_timeout: Option<Duration>,
}

impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionOptions
{
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        (|| {
            if self.enable_wal {
                conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            }
            if self.enable_foreign_keys {
                conn.batch_execute("PRAGMA foreign_keys = ON;")?;
            }
            if let Some(d) = self.busy_timeout {
                conn.batch_execute(&format!("PRAGMA busy_timeout = {};", d.as_millis()))?;
            }
            Ok(())
        })()
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn get_connection_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let db_path_str = db_path.to_str().ok_or(anyhow::anyhow!("Error converting path to string"))?;

    // Ensure the db file exists at the path.
    // This doesn't run the migrations, we just ensure the file exists.
    if !db_path.exists() {
        SqliteConnection::establish(db_path_str)?;
    }

    let manager =
        ConnectionManager::<SqliteConnection>::new(db_path_str);

    let result = Pool::builder()
        .test_on_check_out(true)
        .connection_customizer(Box::new(ConnectionOptions {
            enable_wal: true,
            enable_foreign_keys: true,
            busy_timeout: Some(Duration::from_secs(BUSY_TIMEOUT_SECONDS)),
        }))
        .build(manager);

    match result {
        Ok(pool) => Ok(pool),
        Err(e) => Err(anyhow::anyhow!("Error creating connection pool: {:?}", e)),
    }
}

/// Opens the pool for the database at `db_path` and brings its schema up to date.
pub fn init(db_path: &Path) -> anyhow::Result<DbPool> {
    debug!("Opening database at {:?}", db_path);
    let pool = get_connection_pool(db_path)?;
    let mut connection = get_db_connection(&pool)?;
    run_migrations(&mut *connection)?;
    Ok(pool)
}

pub fn get_db_connection(pool: &DbPool) -> anyhow::Result<DbConnection> {
    Ok(pool.get()?)
}

pub fn run_migrations(connection: &mut impl MigrationHarness<Sqlite>) -> anyhow::Result<()> {
    // Since this error size isn't known at compile-time, convert the error as necessary.
    let result = connection.run_pending_migrations(MIGRATIONS);
    if let Err(e) = result {
        return Err(anyhow::anyhow!("Error running migrations: {:?}", e));
    }
    anyhow::Ok(())
}

/// Gets the default path to the SQLite database file, in the platform's data directory.
/// The DB file may not exist yet; `get_connection_pool()` creates it.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::data_dir().ok_or(anyhow::anyhow!("Error getting app data path"))?;
    Ok(dir.join("simtrials").join(DB_FILENAME))
}
