use sqlx::PgPool;
use statreg_core::reference::CodeTable;
use statreg_db::repositories::CodeTableRepo;

/// Full bootstrap: connect, migrate, verify lookup seeds.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    statreg_db::health_check(&pool).await.unwrap();

    let tables = ["unit_types", "change_reasons", "queue_statuses", "upload_log_statuses"];
    for table in tables {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert!(count.0 > 0, "{table} should have seed data, got 0 rows");
    }
}

/// The liquidated status row exists under code 7.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_unit_status_seed(pool: PgPool) {
    let rows = CodeTableRepo::list(&pool, CodeTable::UnitStatus).await.unwrap();
    let liquidated = rows.iter().find(|r| r.code == "7").expect("liquidated row");
    assert_eq!(liquidated.id, 7);
    assert!(!liquidated.is_deleted);
}

/// Code rows get independent ids per table.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_code_tables_have_own_sequences(pool: PgPool) {
    let region = CodeTableRepo::insert(&pool, CodeTable::Region, "41701", "Bishkek", &[])
        .await
        .unwrap();
    let category = CodeTableRepo::insert(
        &pool,
        CodeTable::ActivityCategory,
        "62.020",
        "IT consulting",
        &["Computer consultancy".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(region, 1);
    assert_eq!(category, 1);

    assert!(CodeTableRepo::soft_delete(&pool, CodeTable::Region, region).await.unwrap());
    let rows = CodeTableRepo::list(&pool, CodeTable::Region).await.unwrap();
    assert!(rows[0].is_deleted, "archived rows are still listed");
}
