//! Embedded schema migrations (`clinic_core/migrations/`).

use sqlx::PgPool;

/// Apply pending migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
