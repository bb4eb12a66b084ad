//! Sets up a throwaway Sqlite database for a test run.

use log::*;
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};

use crate::SqliteDatabase;

/// A `sqlite://` url in the system temp directory that no other test run will collide with.
pub fn random_db_path() -> String {
    let path = std::env::temp_dir().join(format!("bpg_test_store_{}.db", rand::random::<u64>()));
    format!("sqlite://{}", path.display())
}

/// Loads `.env.test`, initialises logging, and (re)creates a migrated database at `url`.
pub async fn prepare_test_env(url: &str) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    // A leftover file from a crashed run would otherwise carry stale rows into this one.
    if let Err(e) = Sqlite::drop_database(url).await {
        warn!("Could not drop the old test database at {url}: {e:?}");
    }
    Sqlite::create_database(url).await.expect("Could not create the test database");
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("Could not connect to the test database");
    migrate!("./src/db/sqlite/migrations").run(db.pool()).await.expect("Could not migrate the test database");
    info!("🚀️ Test database ready at {url}");
}
