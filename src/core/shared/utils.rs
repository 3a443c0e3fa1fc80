use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use tracing::info;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().build(manager)
}

pub fn run_migrations(conn: &mut PgConnection) -> Result<(), Box<dyn std::error::Error>> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| format!("migration failure: {e}"))?;
    if !applied.is_empty() {
        info!("Applied {} pending migrations", applied.len());
    }
    Ok(())
}
