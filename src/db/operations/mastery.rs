use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::db::StoreError;
use crate::mastery::MasteryAggregate;

pub async fn get_mastery(
    conn: &mut SqliteConnection,
    user_id: &str,
    concept_id: &str,
) -> Result<Option<MasteryAggregate>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT "user_id", "concept_id", "total_attempts", "successful_attempts", "last_updated"
        FROM "concept_mastery"
        WHERE "user_id" = ? AND "concept_id" = ?
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(concept_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(map_mastery_row).transpose()
}

pub async fn get_all_mastery(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<MasteryAggregate>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT "user_id", "concept_id", "total_attempts", "successful_attempts", "last_updated"
        FROM "concept_mastery"
        WHERE "user_id" = ?
        ORDER BY "concept_id" ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(map_mastery_row).collect()
}

/// Insert-or-replace keyed by (user_id, concept_id).
pub async fn upsert_mastery(
    conn: &mut SqliteConnection,
    aggregate: &MasteryAggregate,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO "concept_mastery"
            ("user_id", "concept_id", "mastery_score", "total_attempts", "successful_attempts", "last_updated")
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT ("user_id", "concept_id") DO UPDATE SET
            "mastery_score" = excluded."mastery_score",
            "total_attempts" = excluded."total_attempts",
            "successful_attempts" = excluded."successful_attempts",
            "last_updated" = excluded."last_updated"
        "#,
    )
    .bind(&aggregate.user_id)
    .bind(&aggregate.concept_id)
    .bind(aggregate.mastery_score)
    .bind(i64::from(aggregate.total_attempts))
    .bind(i64::from(aggregate.successful_attempts))
    .bind(aggregate.last_updated)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Removes every aggregate of a user. Returns the number of rows deleted.
pub async fn delete_user_mastery(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(r#"DELETE FROM "concept_mastery" WHERE "user_id" = ?"#)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

fn map_mastery_row(row: &SqliteRow) -> Result<MasteryAggregate, StoreError> {
    let user_id: String = row.try_get("user_id")?;
    let concept_id: String = row.try_get("concept_id")?;
    let total: i64 = row.try_get("total_attempts")?;
    let successful: i64 = row.try_get("successful_attempts")?;
    let last_updated: DateTime<Utc> = row.try_get("last_updated")?;

    let corrupt = |reason: String| StoreError::CorruptRow {
        user_id: user_id.clone(),
        concept_id: concept_id.clone(),
        reason,
    };
    let total = u32::try_from(total).map_err(|_| corrupt(format!("total_attempts={total}")))?;
    let successful = u32::try_from(successful)
        .map_err(|_| corrupt(format!("successful_attempts={successful}")))?;

    Ok(MasteryAggregate::restore(
        user_id,
        concept_id,
        total,
        successful,
        last_updated,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MasteryStore;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MasteryStore::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        let found = get_mastery(&mut conn, "nobody", "nothing").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_replaces() {
        let store = MasteryStore::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        let first = MasteryAggregate::restore("u1", "c1", 1, 1, at(8));
        upsert_mastery(&mut conn, &first).await.unwrap();

        let second = MasteryAggregate::restore("u1", "c1", 4, 3, at(9));
        upsert_mastery(&mut conn, &second).await.unwrap();
        upsert_mastery(&mut conn, &second).await.unwrap();

        let stored = get_mastery(&mut conn, "u1", "c1").await.unwrap().unwrap();
        assert_eq!(stored, second);
        assert_eq!(get_all_mastery(&mut conn, "u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_all_is_scoped_to_user() {
        let store = MasteryStore::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        for (user, concept) in [("u1", "a"), ("u1", "b"), ("u2", "a")] {
            let agg = MasteryAggregate::restore(user, concept, 2, 1, at(10));
            upsert_mastery(&mut conn, &agg).await.unwrap();
        }

        let all = get_all_mastery(&mut conn, "u1").await.unwrap();
        let concepts: Vec<_> = all.iter().map(|a| a.concept_id.as_str()).collect();
        assert_eq!(concepts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_user_mastery_only_touches_that_user() {
        let store = MasteryStore::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        for (user, concept) in [("u1", "a"), ("u1", "b"), ("u2", "a")] {
            let agg = MasteryAggregate::restore(user, concept, 1, 0, at(11));
            upsert_mastery(&mut conn, &agg).await.unwrap();
        }

        assert_eq!(delete_user_mastery(&mut conn, "u1").await.unwrap(), 2);
        assert!(get_all_mastery(&mut conn, "u1").await.unwrap().is_empty());
        assert_eq!(get_all_mastery(&mut conn, "u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_counter_check_constraint_rejects_inconsistent_rows() {
        let store = MasteryStore::in_memory().await.unwrap();

        let result = sqlx::query(
            r#"INSERT INTO "concept_mastery" ("user_id", "concept_id", "total_attempts", "successful_attempts", "last_updated")
               VALUES ('u', 'c', 1, 2, '2024-01-01T00:00:00Z')"#,
        )
        .execute(store.pool())
        .await;

        assert!(result.is_err());
    }
}
