//! Integration tests for the write path: definitions loaded from disk,
//! transaction ordering, and store error handling around a bulk write.

mod common;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use helios_indexing::config::IndexingConfig;
use helios_indexing::error::StoreError;
use helios_indexing::rows::{ResourceRecord, ResourceWriteOptions, RowBatch};
use helios_indexing::search::{SearchParameterLoader, SearchParameterRegistryBuilder};
use helios_indexing::store::{DatabaseError, OperationKind, RetryPolicy};
use helios_indexing::transaction::{TransactionEntry, order_entries};
use helios_indexing::types::{SearchValue, TotalMode};
use helios_indexing::IndexingError;

use common::*;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_definitions_load_from_file() {
    let file = write_temp(&search_parameter_bundle().to_string());
    let definitions = SearchParameterLoader::new().load_file(file.path()).unwrap();
    assert_eq!(definitions.len(), 11);

    let composite = definitions
        .iter()
        .find(|d| d.code == "component-code-value-quantity")
        .unwrap();
    assert_eq!(composite.component.len(), 2);
    assert_eq!(composite.component[0].definition, COMPONENT_CODE_URL);

    let mut builder = SearchParameterRegistryBuilder::new().with_core_parameters();
    assert_eq!(builder.register_all(definitions).unwrap(), 11);
    let registry = builder.build();
    assert!(registry.resource_types().contains(&"RiskAssessment".to_string()));
}

#[test]
fn test_missing_definitions_file() {
    let result = SearchParameterLoader::new().load_file("/nonexistent/search-parameters.json");
    assert!(result.is_err());
}

#[test]
fn test_config_file() {
    let file = write_temp(
        r#"{
            "search": {"max_item_count": 200, "include_total": "accurate"},
            "limits": {"string_max_indexed_length": 64},
            "store": {"retry": {"max_retries": 1, "initial_delay": "10ms"}}
        }"#,
    );
    let config = IndexingConfig::from_json_file(file.path()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.search.max_item_count, 200);
    assert_eq!(config.search.default_item_count, 10);
    assert_eq!(config.search.include_total, TotalMode::Accurate);
    assert_eq!(config.limits.string_max_indexed_length, 64);
    assert_eq!(config.limits.reference_id_max_length, 64);
    assert_eq!(config.store.retry.initial_delay, Duration::from_millis(10));
    assert_eq!(config.store.command_timeout, Duration::from_secs(30));

    let invalid = write_temp(r#"{"search": {"max_item_count": 0}}"#);
    let errors = IndexingConfig::from_json_file(invalid.path())
        .unwrap()
        .validate()
        .unwrap_err();
    assert!(!errors.is_empty());
}

#[test]
fn test_transaction_bundle_is_indexed_in_verb_order() {
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {"request": {"method": "GET", "url": "Patient?family=lovelace"}},
            {
                "resource": patient("p2", "Byron"),
                "request": {"method": "POST", "url": "Patient"}
            },
            {"request": {"method": "DELETE", "url": "Patient/p0"}},
            {
                "resource": patient("p1", "Lovelace"),
                "request": {"method": "PUT", "url": "Patient/p1"}
            }
        ]
    });

    let mut entries = TransactionEntry::from_bundle(&bundle);
    order_entries(&mut entries);
    let methods: Vec<&str> = entries.iter().map(|e| e.method.as_str()).collect();
    assert_eq!(methods, vec!["DELETE", "POST", "PUT", "GET"]);

    let registry = registry();
    let indexer = indexer(&registry);
    let mut batch = RowBatch::new(model_ids(&registry), Default::default());

    for (offset, entry) in entries.iter().enumerate() {
        let Some(resource) = &entry.resource else {
            continue;
        };
        let indexed = indexer.extract(resource).unwrap();
        let record = ResourceRecord::new(
            "Patient",
            resource["id"].as_str().unwrap(),
            1,
            chrono::Utc::now(),
            resource.to_string(),
        )
        .with_request_method(entry.method.clone());
        batch
            .add_resource(
                &CancellationToken::new(),
                &record,
                1000 + offset as i64,
                ResourceWriteOptions::default(),
                &indexed,
            )
            .unwrap();
    }

    let rows = batch.rows();
    let written: Vec<(&str, Option<&str>)> = rows
        .resources
        .iter()
        .map(|r| (r.resource_id.as_str(), r.request_method.as_deref()))
        .collect();
    assert_eq!(written, vec![("p2", Some("POST")), ("p1", Some("PUT"))]);
}

#[test]
fn test_deleted_version_writes_no_search_rows() {
    let registry = registry();
    let indexer = indexer(&registry);
    let resource = patient("p1", "Lovelace");
    let entries = indexer.extract(&resource).unwrap();
    assert!(entries.iter().any(|e| matches!(e.value, SearchValue::String { .. })));

    let mut batch = RowBatch::new(model_ids(&registry), Default::default());
    let record = ResourceRecord::new("Patient", "p1", 2, chrono::Utc::now(), "").deleted();
    let added = batch
        .add_resource(
            &CancellationToken::new(),
            &record,
            2000,
            ResourceWriteOptions::default(),
            &entries,
        )
        .unwrap();

    assert_eq!(added, 0);
    assert_eq!(batch.rows().resources.len(), 1);
    assert!(batch.rows().resources[0].is_deleted);
    assert_eq!(batch.rows().search_row_count(), 0);
}

#[test]
fn test_cancelled_write() {
    let registry = registry();
    let mut batch = RowBatch::new(model_ids(&registry), Default::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let record = ResourceRecord::new("Patient", "p1", 1, chrono::Utc::now(), "{}");
    let result = batch.add_resource(
        &cancel,
        &record,
        3000,
        ResourceWriteOptions::default(),
        &[],
    );
    assert!(matches!(result, Err(IndexingError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_bulk_write_retries_login_failure() {
    let policy = RetryPolicy::new(&IndexingConfig::default().store);
    let attempts = Arc::new(AtomicU32::new(0));

    let written = policy
        .execute(OperationKind::Command, &CancellationToken::new(), || {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StoreError::from(DatabaseError::new(
                        18456,
                        "Login failed for user 'fhir'",
                    )))
                } else {
                    Ok(2usize)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(written, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_write_truncation_is_not_retried() {
    let policy = RetryPolicy::new(&IndexingConfig::default().store);
    let attempts = Arc::new(AtomicU32::new(0));
    let message = "String or binary data would be truncated in table 'dbo.TokenSearchParam', column 'Code'";

    let result: Result<(), StoreError> = policy
        .execute(OperationKind::Command, &CancellationToken::new(), || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(DatabaseError::new(2628, message).into())
            }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    match result {
        Err(StoreError::Truncation(truncation)) => assert_eq!(truncation.message, message),
        other => panic!("expected truncation, got {:?}", other),
    }

    // The indexing layer keeps the store classification
    let err: IndexingError = StoreError::from(DatabaseError::new(8152, message)).into();
    assert!(matches!(err, IndexingError::Store(StoreError::Truncation(_))));
}
