use mailbridge_radar::{RadarIndex, SqliteRadarIndex};
use sqlx::sqlite::SqlitePoolOptions;

async fn seeded_index() -> SqliteRadarIndex {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    sqlx::query("CREATE TABLE subjects (ROWID INTEGER PRIMARY KEY, subject TEXT)")
        .execute(&pool)
        .await
        .expect("schema");
    sqlx::query("CREATE TABLE addresses (ROWID INTEGER PRIMARY KEY, address TEXT, comment TEXT)")
        .execute(&pool)
        .await
        .expect("schema");
    sqlx::query("CREATE TABLE mailboxes (ROWID INTEGER PRIMARY KEY, url TEXT)")
        .execute(&pool)
        .await
        .expect("schema");
    sqlx::query(
        r"
        CREATE TABLE messages (
            ROWID INTEGER PRIMARY KEY,
            subject INTEGER,
            sender INTEGER,
            mailbox INTEGER,
            date_received INTEGER,
            read INTEGER,
            flagged INTEGER,
            deleted INTEGER
        )
        ",
    )
    .execute(&pool)
    .await
    .expect("schema");

    sqlx::query("INSERT INTO subjects VALUES (1, 'hello'), (2, 'world')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO addresses VALUES (1, 'a@x.example', 'Alice')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO mailboxes VALUES (1, 'imap://acct/INBOX')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO messages VALUES
            (100, 1, 1, 1, 1700000000, 0, 0, 0),
            (101, 2, 1, 1, 1700000100, 1, 1, 0),
            (102, 1, 1, 1, 1700000200, 0, 0, 1)",
    )
    .execute(&pool)
    .await
    .unwrap();

    SqliteRadarIndex::from_pool(pool)
}

#[tokio::test]
async fn current_max_row_id_reflects_highest_rowid() {
    let index = seeded_index().await;
    assert_eq!(index.current_max_row_id().await.unwrap(), 102);
}

#[tokio::test]
async fn new_rows_since_excludes_deleted_and_orders_ascending() {
    let index = seeded_index().await;
    let rows = index.new_rows_since(0).await.unwrap();

    // row 102 is marked deleted and must not appear.
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].internal_id, 100);
    assert_eq!(rows[1].internal_id, 101);
    assert_eq!(rows[0].mailbox, "INBOX");
    assert!(rows[1].is_read);
}

#[tokio::test]
async fn new_rows_since_is_exclusive_of_the_watermark() {
    let index = seeded_index().await;
    let rows = index.new_rows_since(100).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].internal_id, 101);
}
