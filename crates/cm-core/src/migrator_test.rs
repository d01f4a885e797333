use super::*;
use crate::testing::{MemoryDatabase, MemoryDriver};

fn migrations() -> Vec<Migration> {
    vec![
        Migration::new(1, "create_users", "CREATE TABLE users (id INT);"),
        Migration::new(2, "create_orders", "CREATE TABLE orders (id INT);"),
        Migration::new(3, "add_index", "CREATE INDEX idx ON orders (id);"),
    ]
}

fn migrator(db: &MemoryDatabase, migrations: Vec<Migration>) -> Migrator<MemoryDriver> {
    Migrator::new(db.driver(), migrations)
}

#[tokio::test]
async fn test_up_applies_all_in_order() {
    let db = MemoryDatabase::new();
    let mut m = migrator(&db, migrations());

    let applied = m.up().await.unwrap();

    assert_eq!(applied, vec![1, 2, 3]);
    assert_eq!(m.version().await.unwrap(), VersionState::clean(3));
    assert_eq!(db.scripts().len(), 3);
    assert!(!db.is_locked());
}

#[tokio::test]
async fn test_up_records_dirty_before_each_run() {
    let db = MemoryDatabase::new();
    let mut m = migrator(&db, vec![Migration::new(1, "a", "SELECT 1;")]);
    m.up().await.unwrap();

    assert_eq!(
        db.calls(),
        vec![
            "lock",
            "version",
            "set_version",
            "run",
            "set_version",
            "unlock"
        ]
    );
}

#[tokio::test]
async fn test_up_is_idempotent() {
    let db = MemoryDatabase::new();
    migrator(&db, migrations()).up().await.unwrap();

    let applied = migrator(&db, migrations()).up().await.unwrap();
    assert!(applied.is_empty());
    assert_eq!(db.scripts().len(), 3);
}

#[tokio::test]
async fn test_up_sorts_unordered_input() {
    let db = MemoryDatabase::new();
    let mut list = migrations();
    list.reverse();
    let applied = migrator(&db, list).up().await.unwrap();
    assert_eq!(applied, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failed_run_leaves_previous_version_dirty() {
    let db = MemoryDatabase::new();
    migrator(&db, migrations()[..1].to_vec()).up().await.unwrap();

    let mut list = migrations();
    list[1].sql = "CREATE TABLE orders (id INT); FAIL".to_string();
    let err = migrator(&db, list).up().await.unwrap_err();

    assert!(matches!(err, MigrateError::Run(_)));
    assert_eq!(db.version_state(), VersionState::new(Some(1), true));
    assert!(!db.is_locked(), "lock must be released after a failure");
}

#[tokio::test]
async fn test_failed_first_run_is_dirty_none() {
    let db = MemoryDatabase::new();
    let list = vec![Migration::new(1, "bad", "FAIL")];
    assert!(migrator(&db, list).up().await.is_err());
    assert_eq!(db.version_state(), VersionState::new(None, true));
}

#[tokio::test]
async fn test_dirty_database_refuses_until_forced() {
    let db = MemoryDatabase::new();
    let mut list = migrations();
    list[1].sql = "FAIL".to_string();
    assert!(migrator(&db, list).up().await.is_err());

    let mut m = migrator(&db, migrations());
    let err = m.up().await.unwrap_err();
    assert!(matches!(err, MigrateError::Dirty { ref version } if version == "1"));
    assert!(!db.is_locked());

    m.force(Some(1)).await.unwrap();
    assert_eq!(m.version().await.unwrap(), VersionState::clean(1));

    let applied = m.up().await.unwrap();
    assert_eq!(applied, vec![2, 3]);
}

#[tokio::test]
async fn test_up_fails_when_lock_is_held() {
    let db = MemoryDatabase::new();
    let mut holder = db.driver();
    holder.lock().await.unwrap();

    let err = migrator(&db, migrations()).up().await.unwrap_err();
    assert!(matches!(err, MigrateError::LockTimeout { .. }));
    assert!(db.scripts().is_empty());

    holder.unlock().await.unwrap();
    assert_eq!(
        migrator(&db, migrations()).up().await.unwrap(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn test_drop_all_resets_version() {
    let db = MemoryDatabase::new();
    let mut m = migrator(&db, migrations());
    m.up().await.unwrap();

    m.drop_all().await.unwrap();
    assert_eq!(m.version().await.unwrap(), VersionState::NONE);
    assert!(!db.is_locked());
}

#[tokio::test]
async fn test_close_twice_errors() {
    let db = MemoryDatabase::new();
    let mut m = migrator(&db, migrations());
    m.driver_mut().close().await.unwrap();
    let err = m.close().await.unwrap_err();
    assert!(matches!(err, MigrateError::Close(_)));
}
