//! Store-backed ledger tests. They need a MySQL database with schema.sql
//! applied and are ignored by default; run them with
//! `DATABASE_URL=mysql://... cargo test -- --ignored`.

use chrono::{FixedOffset, TimeZone, Utc};
use sqlx::MySqlPool;
use uuid::Uuid;

use presensi::ledger::{self, LedgerError, SearchFilter};

async fn connect() -> MySqlPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for store tests");
    MySqlPool::connect(&url)
        .await
        .expect("connect to test database")
}

async fn create_user(pool: &MySqlPool) -> u64 {
    let email = format!("{}@test.local", Uuid::new_v4());
    let result =
        sqlx::query("INSERT INTO users (name, email, password, role_id) VALUES (?, ?, ?, 2)")
            .bind("Store Test User")
            .bind(&email)
            .bind("not-a-real-hash")
            .execute(pool)
            .await
            .expect("insert test user");
    result.last_insert_id()
}

async fn cleanup(pool: &MySqlPool, user_id: u64) {
    let _ = sqlx::query("DELETE FROM presence_records WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await;
    let _ = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await;
}

#[actix_web::test]
#[ignore = "needs a migrated MySQL database via DATABASE_URL"]
async fn check_in_check_out_query_round_trip() {
    let pool = connect().await;
    let user_id = create_user(&pool).await;

    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

    let opened = ledger::check_in(&pool, user_id, t0, Some(-7.8), Some(110.3), None)
        .await
        .unwrap();
    assert_eq!(opened.user_id, user_id);
    assert!(opened.check_out.is_none());

    ledger::check_out(&pool, user_id, t1, None, None, None)
        .await
        .unwrap();

    let tz = FixedOffset::east_opt(7 * 3600).unwrap();
    let filter = SearchFilter {
        user_id: Some(user_id),
        ..Default::default()
    };
    let rows = ledger::search(&pool, &filter, tz).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].check_in, t0);
    assert_eq!(rows[0].check_out, Some(t1));
    // check-out without coordinates keeps what check-in recorded
    assert_eq!(rows[0].latitude, Some(-7.8));
    assert_eq!(rows[0].longitude, Some(110.3));

    cleanup(&pool, user_id).await;
}

#[actix_web::test]
#[ignore = "needs a migrated MySQL database via DATABASE_URL"]
async fn concurrent_check_ins_have_exactly_one_winner() {
    let pool = connect().await;
    let user_id = create_user(&pool).await;
    let now = Utc::now();

    let (a, b) = futures::join!(
        ledger::check_in(&pool, user_id, now, None, None, None),
        ledger::check_in(&pool, user_id, now, None, None, None),
    );

    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1, "exactly one check-in may open a session");

    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser.unwrap_err(), LedgerError::AlreadyCheckedIn));

    let open_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM presence_records WHERE user_id = ? AND check_out IS NULL",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open_count, 1);

    cleanup(&pool, user_id).await;
}

#[actix_web::test]
#[ignore = "needs a migrated MySQL database via DATABASE_URL"]
async fn second_check_in_before_check_out_is_rejected() {
    let pool = connect().await;
    let user_id = create_user(&pool).await;

    ledger::check_in(&pool, user_id, Utc::now(), None, None, None)
        .await
        .unwrap();

    let err = ledger::check_in(&pool, user_id, Utc::now(), None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyCheckedIn));

    cleanup(&pool, user_id).await;
}
