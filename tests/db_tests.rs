//! Database and schema tests
//!
//! Tests SQLite migrations, entity storage, and schema constraints

use investor_messaging::infrastructure::database::run_migrations;
use investor_messaging::infrastructure::entities::{Conversation, Message};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

const NOW: &str = "2025-06-01T09:30:00.000Z";

/// Setup test database with migrations
async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

async fn insert_conversation(
    pool: &SqlitePool,
    investor_id: Uuid,
    admin_id: Option<Uuid>,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO conversations (id, investor_id, admin_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(investor_id)
    .bind(admin_id)
    .bind(NOW)
    .bind(NOW)
    .execute(pool)
    .await?;
    Ok(id)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[tokio::test]
async fn test_database_migrations_work() {
    let pool = setup_test_db().await;

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();

    assert!(tables.contains(&"conversations".to_owned()));
    assert!(tables.contains(&"messages".to_owned()));
}

#[tokio::test]
async fn test_one_unassigned_conversation_per_investor() {
    let pool = setup_test_db().await;
    let investor = Uuid::new_v4();

    insert_conversation(&pool, investor, None).await.unwrap();
    let err = insert_conversation(&pool, investor, None).await.unwrap_err();
    assert!(is_unique_violation(&err), "{err:?}");

    // a different investor is unaffected
    insert_conversation(&pool, Uuid::new_v4(), None).await.unwrap();
}

#[tokio::test]
async fn test_one_conversation_per_pair() {
    let pool = setup_test_db().await;
    let investor = Uuid::new_v4();
    let admin = Uuid::new_v4();

    insert_conversation(&pool, investor, Some(admin)).await.unwrap();
    insert_conversation(&pool, investor, None).await.unwrap();
    insert_conversation(&pool, investor, Some(Uuid::new_v4()))
        .await
        .unwrap();

    let err = insert_conversation(&pool, investor, Some(admin))
        .await
        .unwrap_err();
    assert!(is_unique_violation(&err), "{err:?}");
}

#[tokio::test]
async fn test_messages_require_a_conversation() {
    let pool = setup_test_db().await;

    let err = sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .bind("orphan")
    .bind(NOW)
    .execute(&pool)
    .await
    .unwrap_err();

    assert!(matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation()));
}

#[tokio::test]
async fn test_blank_content_is_refused_by_the_schema() {
    let pool = setup_test_db().await;
    let conversation_id = insert_conversation(&pool, Uuid::new_v4(), None)
        .await
        .unwrap();

    let err = sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(conversation_id)
    .bind(Uuid::new_v4())
    .bind("   ")
    .bind(NOW)
    .execute(&pool)
    .await
    .unwrap_err();

    assert!(matches!(err, sqlx::Error::Database(db) if db.is_check_violation()));
}

#[tokio::test]
async fn test_entities_decode_from_rows() {
    let pool = setup_test_db().await;
    let investor = Uuid::new_v4();
    let sender = Uuid::new_v4();
    let conversation_id = insert_conversation(&pool, investor, None).await.unwrap();
    let message_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(conversation_id)
    .bind(sender)
    .bind("Hello!")
    .bind(NOW)
    .execute(&pool)
    .await
    .unwrap();

    let conversation: Conversation = sqlx::query_as("SELECT * FROM conversations WHERE id = ?")
        .bind(conversation_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(conversation.investor_id, investor);
    assert!(conversation.is_unassigned());
    assert!(conversation.last_message_at.is_none());
    assert_eq!(conversation.created_at, conversation.updated_at);

    let message: Message = sqlx::query_as("SELECT * FROM messages WHERE id = ?")
        .bind(message_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(message.conversation_id, conversation_id);
    assert_eq!(message.content, "Hello!");
    assert!(message.is_unread_for(investor));
    assert!(!message.is_unread_for(sender));
    assert_eq!(message.seq, 1);
}
