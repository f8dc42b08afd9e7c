use super::*;
use tempfile::TempDir;

async fn create_store() -> (TempDir, SessionStore) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::new(temp_dir.path().join("sessions.db"))
        .await
        .expect("should open database");
    (temp_dir, SessionStore::new(database))
}

#[tokio::test]
async fn append_only_history() {
    let (_temp_dir, store) = create_store().await;

    for i in 0..4 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert!(store.add_message("s1", role, &format!("turno {i}"), None).await);
    }

    let history = store.get_history("s1", Some(10)).await;
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(history[1].role, Role::Assistant);
}

#[tokio::test]
async fn history_defaults_to_max_history() {
    let (_temp_dir, store) = create_store().await;
    let store = store.with_max_history(3);

    for i in 0..5 {
        store.add_message("s1", Role::User, &format!("m{i}"), None).await;
    }

    let history = store.get_history("s1", None).await;
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m0", "m1", "m2"]);

    assert_eq!(store.get_history("s1", Some(1)).await.len(), 1);
    assert_eq!(store.message_count("s1").await, 5);
}

#[tokio::test]
async fn create_session_is_idempotent() {
    let (_temp_dir, store) = create_store().await;

    assert!(store.create_session("s1", None).await);
    assert!(store.create_session("s1", None).await);
    assert_eq!(store.list_sessions(None).await.len(), 1);
    assert!(store.get_session("s1").await.is_some());
    assert!(store.get_session("missing").await.is_none());
}

#[tokio::test]
async fn delete_and_prune() {
    let (_temp_dir, store) = create_store().await;

    store.add_message("a", Role::User, "oi", None).await;
    store.add_message("b", Role::User, "olá", None).await;

    assert!(store.delete_session("a").await);
    assert!(!store.delete_session("a").await);
    assert!(store.get_history("a", None).await.is_empty());

    assert_eq!(store.clear_older_than(DEFAULT_RETENTION_DAYS).await, 0);
    assert_eq!(store.list_sessions(Some(10)).await.len(), 1);
}

#[tokio::test]
async fn storage_failures_yield_safe_defaults() {
    let (_temp_dir, store) = create_store().await;
    store.database.pool().close().await;

    assert!(!store.add_message("s1", Role::User, "oi", None).await);
    assert!(!store.create_session("s1", None).await);
    assert!(store.get_history("s1", None).await.is_empty());
    assert!(store.get_session("s1").await.is_none());
    assert!(store.list_sessions(None).await.is_empty());
    assert!(!store.delete_session("s1").await);
    assert_eq!(store.clear_older_than(1).await, 0);
    assert!(store.append_message("s1", Role::User, "oi", None).await.is_none());
    assert_eq!(store.prune(1).await, 0);
    assert!(!store.compact().await);
    assert_eq!(store.session_count().await, 0);
}

#[tokio::test]
async fn append_returns_stored_row() {
    let (_temp_dir, store) = create_store().await;

    let first = store
        .append_message("s1", Role::User, "Vocês fazem espelhos?", None)
        .await
        .expect("message should be stored");
    let second = store
        .append_message("s1", Role::User, "Vocês fazem espelhos?", None)
        .await
        .expect("message should be stored");

    assert_ne!(first.id, second.id);
    assert_eq!(second.session_id, "s1");
    assert_eq!(second.role, Role::User);

    let history = store.get_history("s1", None).await;
    assert_eq!(history.last().map(|m| m.id), Some(second.id));
}

#[tokio::test]
async fn prune_sweeps_then_compacts() {
    let (_temp_dir, store) = create_store().await;

    store.add_message("antiga", Role::User, "oi", None).await;
    store.add_message("recente", Role::User, "oi", None).await;
    assert_eq!(store.session_count().await, 2);

    sqlx::query("UPDATE sessions SET updated_at = datetime('now', '-60 days') WHERE session_id = ?")
        .bind("antiga")
        .execute(store.database.pool())
        .await
        .expect("should backdate session");

    assert_eq!(store.prune(30).await, 1);
    assert_eq!(store.session_count().await, 1);
    assert!(store.get_session("recente").await.is_some());

    assert_eq!(store.prune(30).await, 0);
    assert!(store.compact().await);
}
