//! End-to-end tests from resource JSON to storage rows.
//!
//! Resources are indexed with the fixture registry and fed through a
//! [`RowBatch`], the way a bulk writer would.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use helios_indexing::codec::{PayloadFormat, ResourceCodec};
use helios_indexing::config::RowLimits;
use helios_indexing::rows::composite::CompositeComponents;
use helios_indexing::rows::surrogate::last_updated_from_surrogate_id;
use helios_indexing::rows::{
    BatchRows, CompositeShape, InMemoryModelIds, ModelIdResolver, ResourceRecord,
    ResourceWriteOptions, RowBatch, SurrogateIdGenerator,
};
use helios_indexing::search::SearchParameterRegistry;

use common::*;

fn last_updated(resource: &Value) -> DateTime<Utc> {
    resource["meta"]["lastUpdated"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Indexes resources into one batch and returns its rows.
fn index_all(
    registry: &Arc<SearchParameterRegistry>,
    limits: RowLimits,
    resources: &[Value],
) -> BatchRows {
    index_with_ids(registry, model_ids(registry), limits, resources)
}

fn index_with_ids(
    registry: &Arc<SearchParameterRegistry>,
    ids: Arc<InMemoryModelIds>,
    limits: RowLimits,
    resources: &[Value],
) -> BatchRows {
    let indexer = indexer(registry);
    let surrogate_ids = SurrogateIdGenerator::new();
    let mut batch = RowBatch::new(ids, limits);

    for resource in resources {
        let entries = indexer.extract(resource).unwrap();
        let (surrogate_id, updated) = surrogate_ids.next(last_updated(resource));
        let record = ResourceRecord::new(
            resource["resourceType"].as_str().unwrap(),
            resource["id"].as_str().unwrap(),
            1,
            updated,
            resource.to_string(),
        );
        batch
            .add_resource(
                &CancellationToken::new(),
                &record,
                surrogate_id,
                ResourceWriteOptions::default(),
                &entries,
            )
            .unwrap();
    }

    batch.into_rows()
}

fn decimal(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[test]
fn test_long_string_overflows_with_full_text() {
    let registry = registry();
    let limits = RowLimits {
        string_max_indexed_length: 8,
        ..RowLimits::default()
    };
    let rows = index_all(&registry, limits, &[patient("p1", "Featherstonehaugh")]);

    let family = rows
        .strings
        .iter()
        .find(|r| r.text.starts_with("Feather"))
        .expect("family row");
    assert_eq!(family.text, "Feathers");
    assert_eq!(family.text_overflow.as_deref(), Some("Featherstonehaugh"));
    assert!(family.is_min && family.is_max);
}

#[test]
fn test_short_string_has_no_overflow() {
    let registry = registry();
    let limits = RowLimits {
        string_max_indexed_length: 8,
        ..RowLimits::default()
    };
    let rows = index_all(&registry, limits, &[patient("p1", "Lovelace")]);

    let family = rows
        .strings
        .iter()
        .find(|r| r.text == "Lovelace")
        .expect("family row");
    assert_eq!(family.text_overflow, None);
}

#[test]
fn test_composite_rows_are_product_of_alternatives() {
    let registry = registry();
    let rows = index_all(&registry, RowLimits::default(), &[blood_pressure("o1", "p1")]);

    // Systolic: 2 codings x 1 quantity, diastolic: 1 x 1
    assert_eq!(rows.composites.len(), 3);
    for row in &rows.composites {
        assert_eq!(row.components.shape(), CompositeShape::TokenQuantity);
        match &row.components {
            CompositeComponents::TokenQuantity(token, quantity) => {
                assert_eq!(token.key.search_param_id, 0);
                assert_eq!(quantity.key.search_param_id, 0);
                assert!(quantity.single_value.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    let codes: Vec<&str> = rows
        .composites
        .iter()
        .filter_map(|row| match &row.components {
            CompositeComponents::TokenQuantity(token, _) => Some(token.code.as_str()),
            _ => None,
        })
        .collect();
    assert!(codes.contains(&"8480-6"));
    assert!(codes.contains(&"271649006"));
    assert!(codes.contains(&"8462-4"));
}

#[test]
fn test_number_point_and_range() {
    let registry = registry();
    let rows = index_all(&registry, RowLimits::default(), &[risk_assessment("r1")]);

    assert_eq!(rows.numbers.len(), 2);

    let point = rows
        .numbers
        .iter()
        .find(|r| r.single_value.is_some())
        .expect("point row");
    assert_eq!(point.single_value, Some(decimal("0.25")));
    assert_eq!(point.low_value, None);
    assert_eq!(point.high_value, None);

    let range = rows
        .numbers
        .iter()
        .find(|r| r.single_value.is_none())
        .expect("range row");
    assert_eq!(range.low_value, Some(decimal("0.1")));
    assert_eq!(range.high_value, Some(decimal("0.4")));
}

#[test]
fn test_tokens_references_and_dates() {
    let registry = registry();
    let ids = model_ids(&registry);
    let rows = index_with_ids(
        &registry,
        ids.clone(),
        RowLimits::default(),
        &[patient("p1", "Lovelace"), blood_pressure("o1", "p1")],
    );

    assert_eq!(rows.resources.len(), 2);

    let gender = rows
        .tokens
        .iter()
        .find(|r| r.code == "female")
        .expect("gender row");
    assert_eq!(gender.system_id, None);

    let loinc = ids.system_id("http://loinc.org");
    assert!(
        rows.tokens
            .iter()
            .any(|r| r.code == "85354-9" && r.system_id == Some(loinc))
    );

    let subject = rows
        .references
        .iter()
        .find(|r| r.reference_resource_id == "p1")
        .expect("subject row");
    assert_eq!(
        subject.reference_resource_type_id,
        ids.resource_type_id("Patient")
    );

    // birthdate and _lastUpdated
    assert!(rows.dates.len() >= 2);
    let birthdate = rows
        .dates
        .iter()
        .find(|r| r.start_date_time.format("%Y-%m-%d").to_string() == "1985-06-21")
        .expect("birthdate row");
    assert!(!birthdate.is_long_span);
}

#[test]
fn test_duplicate_values_in_a_batch_collapse() {
    let registry = registry();
    let mut resource = patient("p1", "Smith");
    resource["name"] = serde_json::json!([
        {"family": "Smith"},
        {"family": "SMITH"}
    ]);
    let rows = index_all(&registry, RowLimits::default(), &[resource]);

    let smiths: Vec<_> = rows
        .strings
        .iter()
        .filter(|r| r.text.eq_ignore_ascii_case("smith"))
        .collect();
    assert_eq!(smiths.len(), 1);
    assert!(smiths[0].is_min && smiths[0].is_max);
}

#[test]
fn test_resource_row_payload_and_surrogate_id() {
    let registry = registry();
    let resource = patient("p1", "Lovelace");
    let rows = index_all(&registry, RowLimits::default(), &[resource.clone()]);

    let row = &rows.resources[0];
    assert_eq!(row.resource_id, "p1");
    assert_eq!(
        last_updated_from_surrogate_id(row.resource_surrogate_id),
        Some(last_updated(&resource))
    );

    let (text, format) = ResourceCodec::new()
        .read_with_format(&row.raw_resource)
        .unwrap();
    assert_eq!(format, PayloadFormat::Current);
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), resource);
}

#[test]
fn test_legacy_payload_still_decodes() {
    let codec = ResourceCodec::new();
    let text = r#"{"resourceType":"Patient","id":"p1","name":[{"family":"Brontë"}]}"#;

    let legacy = codec.write_with_format(text, PayloadFormat::Legacy).unwrap();
    let (decoded, format) = codec.read_with_format(&legacy).unwrap();
    assert_eq!(decoded, text);
    assert_eq!(format, PayloadFormat::Legacy);

    // Re-encoding writes the current format
    let current = codec.write(&decoded).unwrap();
    assert_eq!(
        codec.read_with_format(&current).unwrap(),
        (text.to_string(), PayloadFormat::Current)
    );
}

#[test]
fn test_parallel_batches_merge() {
    let registry = registry();
    let indexer = indexer(&registry);
    let surrogate_ids = SurrogateIdGenerator::new();
    let mut main = RowBatch::new(model_ids(&registry), RowLimits::default());

    let mut workers: Vec<RowBatch> = (0..2).map(|_| main.fork()).collect();
    for (worker, id) in workers.iter_mut().zip(["p1", "p2"]) {
        let resource = patient(id, "Shared");
        let entries = indexer.extract(&resource).unwrap();
        let (surrogate_id, updated) = surrogate_ids.next(last_updated(&resource));
        let record = ResourceRecord::new("Patient", id, 1, updated, resource.to_string());
        worker
            .add_resource(
                &CancellationToken::new(),
                &record,
                surrogate_id,
                ResourceWriteOptions::default(),
                &entries,
            )
            .unwrap();
    }
    for worker in workers {
        main.merge(worker);
    }

    let rows = main.rows();
    assert_eq!(rows.resources.len(), 2);
    // Same family, different resources: one row each
    assert_eq!(
        rows.strings.iter().filter(|r| r.text == "Shared").count(),
        2
    );
}
