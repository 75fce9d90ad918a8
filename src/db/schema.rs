use sqlx::SqlitePool;

pub const SCHEMA_VERSION: &str = "1";

/// No-op write on the metadata row; acquires the database write lock.
pub(crate) const TAKE_WRITE_LOCK: &str =
    r#"UPDATE "_db_metadata" SET "value" = "value" WHERE "key" = 'schema_version'"#;

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS "concept_mastery" (
        "user_id" TEXT NOT NULL,
        "concept_id" TEXT NOT NULL,
        "mastery_score" REAL NOT NULL DEFAULT 0.0,
        "total_attempts" INTEGER NOT NULL DEFAULT 0 CHECK ("total_attempts" >= 0),
        "successful_attempts" INTEGER NOT NULL DEFAULT 0
            CHECK ("successful_attempts" >= 0 AND "successful_attempts" <= "total_attempts"),
        "last_updated" TEXT NOT NULL,
        PRIMARY KEY ("user_id", "concept_id")
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS "_db_metadata" (
        "key" TEXT PRIMARY KEY,
        "value" TEXT NOT NULL
    )
    "#,
];

pub async fn bootstrap(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA_STATEMENTS {
        sqlx::query(stmt.trim()).execute(pool).await?;
    }

    sqlx::query(
        r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    tracing::debug!(version = SCHEMA_VERSION, "mastery schema ready");
    Ok(())
}
