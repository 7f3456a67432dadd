//! Repository behavior against the in-memory backend

use std::sync::Arc;

use backend_traits::{BackendError, ManualClock, QueryValue, Relation};
use chrono::{Duration, TimeZone, Utc};
use core_repository::{
    EntitySchema, IdGeneration, MemoryBackend, Record, Repository, RepositoryErrorKind,
    RepositoryOperation,
};
use core_runtime::{CoreConfig, NamingConvention};
use serde_json::{json, Value};

const CREATED_AT: &str = "2024-01-01T00:00:00.000Z";
const ONE_HOUR_LATER: &str = "2024-01-01T01:00:00.000Z";

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ))
}

fn repository(backend: Arc<MemoryBackend>, schema: EntitySchema) -> (Repository, Arc<ManualClock>) {
    let clock = clock();
    let repo = Repository::new(backend, schema).with_clock(clock.clone());
    (repo, clock)
}

fn test_repository() -> (Repository, Arc<MemoryBackend>, Arc<ManualClock>) {
    let backend = Arc::new(MemoryBackend::new());
    let (repo, clock) = repository(backend.clone(), EntitySchema::new("Test", "test_table"));
    (repo, backend, clock)
}

async fn seed(repo: &Repository, names: &[&str]) {
    for name in names {
        repo.insert(rec(json!({ "name": name }))).await.unwrap();
    }
}

#[tokio::test]
async fn test_insert_round_trips_with_generated_fields() {
    let (repo, _, _) = test_repository();

    let created = repo.insert(rec(json!({"name": "Marvel"}))).await.unwrap();
    assert_eq!(
        created,
        rec(json!({
            "id": 1,
            "name": "Marvel",
            "createdDate": CREATED_AT,
            "lastUpdatedDate": CREATED_AT,
            "isDeleted": false
        }))
    );

    let found = repo.find_by_id(1_i64).await.unwrap();
    assert_eq!(found, created);
}

#[tokio::test]
async fn test_insert_keeps_caller_values() {
    let (repo, _, _) = test_repository();

    let created = repo
        .insert(rec(json!({
            "id": 10,
            "name": "Image",
            "createdDate": "2020-05-05T00:00:00.000Z"
        })))
        .await
        .unwrap();

    assert_eq!(created["id"], json!(10));
    assert_eq!(created["createdDate"], json!("2020-05-05T00:00:00.000Z"));
    assert_eq!(created["lastUpdatedDate"], json!(CREATED_AT));
}

#[tokio::test]
async fn test_insert_stores_snake_case_columns() {
    let (repo, backend, _) = test_repository();
    repo.insert(rec(json!({"name": "DC"}))).await.unwrap();

    let rows = backend.rows("test_table").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("is_deleted"), Some(&QueryValue::Boolean(false)));
    assert_eq!(
        rows[0].get("created_date"),
        Some(&QueryValue::Text(CREATED_AT.to_string()))
    );
    assert!(!rows[0].contains_key("isDeleted"));
}

#[tokio::test]
async fn test_soft_remove_then_find_by_id() {
    let (repo, backend, clock) = test_repository();
    seed(&repo, &["Marvel"]).await;
    clock.advance(Duration::hours(1));

    let removed = repo.remove_by_id(1_i64).await.unwrap();
    assert_eq!(removed["isDeleted"], json!(true));
    assert_eq!(removed["lastUpdatedDate"], json!(ONE_HOUR_LATER));

    let err = repo.find_by_id(1_i64).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);
    assert_eq!(err.operation(), RepositoryOperation::FindById);

    let found = repo.include_removed(true).find_by_id(1_i64).await.unwrap();
    assert_eq!(found["isDeleted"], json!(true));
    assert_eq!(found["name"], json!("Marvel"));

    assert_eq!(backend.rows("test_table").await.len(), 1);
}

#[tokio::test]
async fn test_soft_remove_twice_is_not_found() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel"]).await;

    repo.remove_by_id(1_i64).await.unwrap();
    let err = repo.remove_by_id(1_i64).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);
    assert_eq!(err.operation(), RepositoryOperation::RemoveById);
}

#[tokio::test]
async fn test_find_all_excludes_removed_rows() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel", "DC", "Image"]).await;
    repo.remove_by_id(2_i64).await.unwrap();

    let visible = repo.find_all().await.unwrap();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|r| r["isDeleted"] == json!(false)));

    let everything = repo.include_removed(true).find_all().await.unwrap();
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn test_update_on_removed_row() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel"]).await;
    repo.remove_by_id(1_i64).await.unwrap();

    let err = repo
        .update_by_id(1_i64, rec(json!({"name": "New"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);

    let updated = repo
        .include_removed(true)
        .update_by_id(1_i64, rec(json!({"name": "New"})))
        .await
        .unwrap();
    assert_eq!(updated["name"], json!("New"));
    assert_eq!(updated["isDeleted"], json!(true));
}

#[tokio::test]
async fn test_update_missing_id_is_not_found() {
    let (repo, _, _) = test_repository();

    let err = repo
        .update_by_id(999_i64, rec(json!({"name": "x"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);
    assert_eq!(err.operation(), RepositoryOperation::UpdateById);
    assert_eq!(err.entity(), "Test");
    assert_eq!(err.cause(), &BackendError::EmptyResponse);
}

#[tokio::test]
async fn test_update_patches_and_stamps() {
    let (repo, _, clock) = test_repository();
    seed(&repo, &["Marvel"]).await;
    clock.advance(Duration::hours(1));

    let updated = repo
        .update_by_id(1_i64, rec(json!({"id": 5, "name": "Marvel Comics"})))
        .await
        .unwrap();
    assert_eq!(updated["id"], json!(1));
    assert_eq!(updated["name"], json!("Marvel Comics"));
    assert_eq!(updated["createdDate"], json!(CREATED_AT));
    assert_eq!(updated["lastUpdatedDate"], json!(ONE_HOUR_LATER));

    let found = repo.find_by_id(1_i64).await.unwrap();
    assert_eq!(found, updated);
}

#[tokio::test]
async fn test_update_with_only_id_returns_existing() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel"]).await;

    let unchanged = repo.update_by_id(1_i64, rec(json!({"id": 1}))).await.unwrap();
    assert_eq!(unchanged["lastUpdatedDate"], json!(CREATED_AT));
}

#[tokio::test]
async fn test_update_record_carrying_id() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel"]).await;

    let mut record = repo.find_by_id(1_i64).await.unwrap();
    record.insert("name".to_string(), json!("Renamed"));
    let updated = repo.update(record).await.unwrap();
    assert_eq!(updated["name"], json!("Renamed"));

    let err = repo.update(rec(json!({"name": "x"}))).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::Validation);
    assert!(matches!(err.cause(), BackendError::InvalidValue { field, .. } if field == "id"));
}

#[tokio::test]
async fn test_nested_values_are_validation_errors() {
    let (repo, _, _) = test_repository();

    let err = repo
        .insert(rec(json!({"name": "DC", "tags": ["a"]})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::Validation);
    assert_eq!(err.operation(), RepositoryOperation::Insert);
}

#[tokio::test]
async fn test_constraint_violation_is_validation_error() {
    let (repo, backend, _) = test_repository();
    backend.require_columns("test_table", ["name"]).await;

    let err = repo.insert(rec(json!({"title": "x"}))).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::Validation);
    assert!(matches!(err.cause(), BackendError::ConstraintViolation(_)));
}

#[tokio::test]
async fn test_find_by_criteria() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel", "DC", "Marvel"]).await;
    repo.remove_by_id(3_i64).await.unwrap();

    let found = repo
        .find_by_criteria(rec(json!({"name": "Marvel"})))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let found = repo
        .include_removed(true)
        .find_by_criteria(rec(json!({"name": "Marvel"})))
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn test_caller_flag_criteria_wins() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel", "DC"]).await;
    repo.remove_by_id(1_i64).await.unwrap();

    let removed = repo
        .find_by_criteria(rec(json!({"isDeleted": true})))
        .await
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0]["name"], json!("Marvel"));
}

#[tokio::test]
async fn test_find_one_by_criteria() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel", "DC"]).await;

    let found = repo
        .find_one_by_criteria(rec(json!({"name": "DC"})))
        .await
        .unwrap();
    assert_eq!(found["id"], json!(2));

    let err = repo
        .find_one_by_criteria(rec(json!({"name": "Dark Horse"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);
    assert_eq!(err.operation(), RepositoryOperation::FindOneByCriteria);
}

#[tokio::test]
async fn test_require_turns_empty_reads_into_not_found() {
    let (repo, _, _) = test_repository();

    assert!(repo.find_all().await.unwrap().is_empty());
    let err = repo.require(true).find_all().await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);
    assert_eq!(err.operation(), RepositoryOperation::FindAll);

    seed(&repo, &["Marvel"]).await;
    assert!(repo
        .find_by_criteria(rec(json!({"name": "DC"})))
        .await
        .unwrap()
        .is_empty());
    let err = repo
        .require(true)
        .find_by_criteria(rec(json!({"name": "DC"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);

    let found = repo.require(true).debug(true).find_all().await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_scenario_custom_flag() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = EntitySchema::new("Test", "test_table")
        .without_timestamps()
        .soft_delete("removed");
    let (repo, _) = repository(backend, schema);

    let created = repo
        .insert(rec(json!({"id": 1, "name": "A"})))
        .await
        .unwrap();
    assert_eq!(created, rec(json!({"id": 1, "name": "A", "removed": false})));

    let removed = repo.remove_by_id(1_i64).await.unwrap();
    assert_eq!(removed, rec(json!({"id": 1, "name": "A", "removed": true})));

    let err = repo.find_by_id(1_i64).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);

    let found = repo.include_removed(true).find_by_id(1_i64).await.unwrap();
    assert_eq!(found, rec(json!({"id": 1, "name": "A", "removed": true})));
}

#[tokio::test]
async fn test_scenario_hard_delete() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = EntitySchema::new("Test", "test_table")
        .without_timestamps()
        .hard_delete();
    let (repo, _) = repository(backend.clone(), schema);

    let created = repo.insert(rec(json!({"id": 2}))).await.unwrap();
    assert_eq!(created, rec(json!({"id": 2})));

    let removed = repo.remove_by_id(2_i64).await.unwrap();
    assert_eq!(removed, rec(json!({"id": 2})));

    let err = repo.find_by_id(2_i64).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);
    assert!(backend.rows("test_table").await.is_empty());

    let err = repo.remove_by_id(2_i64).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotRemoved);
    assert_eq!(err.cause(), &BackendError::NoRowsDeleted);
}

#[tokio::test]
async fn test_uuid_ids() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = EntitySchema::new("Test", "test_table").id_generation(IdGeneration::Uuid);
    let (repo, _) = repository(backend, schema);

    let created = repo.insert(rec(json!({"name": "Marvel"}))).await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 36);

    let found = repo.find_by_id(id.as_str()).await.unwrap();
    assert_eq!(found["name"], json!("Marvel"));

    let explicit = repo
        .insert(rec(json!({"id": "fixed", "name": "DC"})))
        .await
        .unwrap();
    assert_eq!(explicit["id"], json!("fixed"));
}

#[tokio::test]
async fn test_schema_from_configured_conventions() {
    let config = CoreConfig::builder()
        .in_memory()
        .naming_convention(NamingConvention::Identity)
        .delete_flag("archived")
        .build()
        .unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let schema = EntitySchema::with_conventions("Test", "test_table", &config.conventions);
    let (repo, _) = repository(backend.clone(), schema);

    repo.insert(rec(json!({"name": "Marvel"}))).await.unwrap();
    repo.remove_by_id(1_i64).await.unwrap();

    let rows = backend.rows("test_table").await;
    assert_eq!(rows[0].get("archived"), Some(&QueryValue::Boolean(true)));
    assert!(rows[0].contains_key("createdDate"));
    assert!(repo.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_related_rows_are_nested() {
    let backend = Arc::new(MemoryBackend::new());
    let parent_schema = EntitySchema::new("Test", "test_table")
        .relation(Relation::has_many("related", "test_related", "test_id"));
    let child_schema = EntitySchema::new("Related", "test_related")
        .relation(Relation::belongs_to("test", "test_table", "test_id"));
    let (parents, _) = repository(backend.clone(), parent_schema);
    let (children, _) = repository(backend, child_schema);

    seed(&parents, &["Marvel", "DC"]).await;
    children
        .insert(rec(json!({"testId": 1, "name": "Spider-Man"})))
        .await
        .unwrap();
    children
        .insert(rec(json!({"testId": 1, "name": "Hulk"})))
        .await
        .unwrap();

    let marvel = parents.with_related(["related"]).find_by_id(1_i64).await.unwrap();
    let related = marvel["related"].as_array().unwrap();
    assert_eq!(related.len(), 2);
    assert_eq!(related[0]["testId"], json!(1));

    let dc = parents.with_related(["related"]).find_by_id(2_i64).await.unwrap();
    assert_eq!(dc["related"], json!([]));

    let hulk = children.with_related(["test"]).find_by_id(2_i64).await.unwrap();
    assert_eq!(hulk["test"]["name"], json!("Marvel"));

    let plain = parents.find_by_id(1_i64).await.unwrap();
    assert!(!plain.contains_key("related"));
}

#[tokio::test]
async fn test_unknown_relation_fails_before_reading() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel"]).await;

    let err = repo
        .with_related(["publisher"])
        .find_all()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::Backend);
    assert!(matches!(err.cause(), BackendError::InvalidQuery(m) if m.contains("publisher")));
}

#[tokio::test]
async fn test_transaction_rollback() {
    let (repo, _, _) = test_repository();

    let tx = repo.begin_transaction().await.unwrap();
    repo.with_transaction(tx)
        .insert(rec(json!({"name": "Marvel"})))
        .await
        .unwrap();

    assert!(repo.find_all().await.unwrap().is_empty());
    assert_eq!(repo.with_transaction(tx).find_all().await.unwrap().len(), 1);

    repo.rollback_transaction(tx).await.unwrap();
    assert!(repo.find_all().await.unwrap().is_empty());

    let err = repo.commit_transaction(tx).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::Backend);
    assert_eq!(err.operation(), RepositoryOperation::Transaction);
}

#[tokio::test]
async fn test_transaction_scopes_fetch_then_patch() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel"]).await;

    let tx = repo.begin_transaction().await.unwrap();
    repo.with_transaction(tx).remove_by_id(1_i64).await.unwrap();

    // Still visible outside the transaction
    assert_eq!(repo.find_all().await.unwrap().len(), 1);
    let err = repo
        .with_transaction(tx)
        .update_by_id(1_i64, rec(json!({"name": "x"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);

    repo.commit_transaction(tx).await.unwrap();
    assert!(repo.find_all().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_keep_their_own_options() {
    let (repo, _, _) = test_repository();
    seed(&repo, &["Marvel", "DC"]).await;
    repo.remove_by_id(1_i64).await.unwrap();

    let calls = (0..32).map(|i| {
        let repo = repo.clone();
        tokio::spawn(async move {
            if i % 2 == 0 {
                repo.include_removed(true)
                    .find_all()
                    .await
                    .map(|records| records.len())
                    .map_err(|e| e.kind())
            } else {
                repo.require(true)
                    .find_by_criteria(rec(json!({"name": "Marvel"})))
                    .await
                    .map(|records| records.len())
                    .map_err(|e| e.kind())
            }
        })
    });

    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        let result = result.unwrap();
        if i % 2 == 0 {
            assert_eq!(result, Ok(2));
        } else {
            assert_eq!(result, Err(RepositoryErrorKind::NotFound));
        }
    }

    assert_eq!(repo.find_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_commit_keeps_concurrent_outside_inserts() {
    let (repo, _, _) = test_repository();

    let tx = repo.begin_transaction().await.unwrap();
    repo.insert(rec(json!({"name": "outside"}))).await.unwrap();
    repo.with_transaction(tx)
        .insert(rec(json!({"name": "inside"})))
        .await
        .unwrap();
    repo.commit_transaction(tx).await.unwrap();

    let names: Vec<Value> = repo
        .find_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("outside"), json!("inside")]);
}

#[tokio::test]
async fn test_snake_case_schema_fields_round_trip() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = EntitySchema::new("Test", "test_table")
        .id_field("test_id")
        .timestamps("created_at", "updated_at")
        .soft_delete("is_removed");
    let (repo, _) = repository(backend.clone(), schema);

    let created = repo.insert(rec(json!({"name": "A"}))).await.unwrap();
    assert_eq!(created["test_id"], json!(1));
    assert_eq!(created["is_removed"], json!(false));
    assert_eq!(created["created_at"], json!(CREATED_AT));
    assert!(!created.contains_key("testId"));

    let mut record = created.clone();
    record.insert("name".to_string(), json!("B"));
    let updated = repo.update(record).await.unwrap();
    assert_eq!(updated["name"], json!("B"));
    assert_eq!(updated["test_id"], json!(1));

    let removed = repo.remove_by_id(1_i64).await.unwrap();
    assert_eq!(removed["is_removed"], json!(true));
    assert!(repo.find_all().await.unwrap().is_empty());
}
