//! Shared fixtures for the indexing integration tests.
//!
//! Provides a small SearchParameter bundle covering every value kind, the
//! registry and indexer built from it, and sample resources.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};

use helios_indexing::config::SearchConfig;
use helios_indexing::rows::InMemoryModelIds;
use helios_indexing::search::{
    JsonPathEvaluator, SearchIndexEntry, SearchIndexer, SearchOptionsFactory,
    SearchParameterLoader, SearchParameterRegistry, SearchParameterRegistryBuilder,
};

pub const CODE_URL: &str = "http://hl7.org/fhir/SearchParameter/clinical-code";
pub const COMPONENT_CODE_URL: &str =
    "http://hl7.org/fhir/SearchParameter/Observation-component-code";
pub const COMPONENT_VALUE_URL: &str =
    "http://hl7.org/fhir/SearchParameter/Observation-component-value-quantity";

fn search_parameter(
    url: &str,
    code: &str,
    kind: &str,
    base: &[&str],
    expression: &str,
) -> Value {
    json!({
        "resourceType": "SearchParameter",
        "url": url,
        "name": code,
        "status": "active",
        "code": code,
        "type": kind,
        "base": base,
        "expression": expression
    })
}

/// Returns a Bundle of SearchParameter resources.
pub fn search_parameter_bundle() -> Value {
    let mut subject = search_parameter(
        "http://hl7.org/fhir/SearchParameter/Observation-subject",
        "subject",
        "reference",
        &["Observation"],
        "Observation.subject",
    );
    subject["target"] = json!(["Patient", "Group"]);

    let mut general_practitioner = search_parameter(
        "http://hl7.org/fhir/SearchParameter/Patient-general-practitioner",
        "general-practitioner",
        "reference",
        &["Patient"],
        "Patient.generalPractitioner",
    );
    general_practitioner["target"] = json!(["Practitioner", "Organization"]);

    let mut code_value_quantity = search_parameter(
        "http://hl7.org/fhir/SearchParameter/Observation-component-code-value-quantity",
        "component-code-value-quantity",
        "composite",
        &["Observation"],
        "Observation.component",
    );
    code_value_quantity["component"] = json!([
        {"definition": COMPONENT_CODE_URL, "expression": "code"},
        {"definition": COMPONENT_VALUE_URL, "expression": "value.ofType(Quantity)"}
    ]);

    let resources = vec![
        search_parameter(
            "http://hl7.org/fhir/SearchParameter/individual-family",
            "family",
            "string",
            &["Patient", "Practitioner"],
            "Patient.name.family | Practitioner.name.family",
        ),
        search_parameter(
            "http://hl7.org/fhir/SearchParameter/individual-gender",
            "gender",
            "token",
            &["Patient", "Practitioner"],
            "Patient.gender | Practitioner.gender",
        ),
        search_parameter(
            "http://hl7.org/fhir/SearchParameter/individual-birthdate",
            "birthdate",
            "date",
            &["Patient"],
            "Patient.birthDate",
        ),
        general_practitioner,
        search_parameter(
            CODE_URL,
            "code",
            "token",
            &["Observation"],
            "Observation.code",
        ),
        subject,
        search_parameter(
            "http://hl7.org/fhir/SearchParameter/Observation-value-quantity",
            "value-quantity",
            "quantity",
            &["Observation"],
            "Observation.value.ofType(Quantity)",
        ),
        search_parameter(
            COMPONENT_CODE_URL,
            "component-code",
            "token",
            &["Observation"],
            "Observation.component.code",
        ),
        search_parameter(
            COMPONENT_VALUE_URL,
            "component-value-quantity",
            "quantity",
            &["Observation"],
            "Observation.component.value.ofType(Quantity)",
        ),
        code_value_quantity,
        search_parameter(
            "http://hl7.org/fhir/SearchParameter/RiskAssessment-probability",
            "probability",
            "number",
            &["RiskAssessment"],
            "RiskAssessment.prediction.probability",
        ),
    ];

    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": resources
            .into_iter()
            .map(|resource| json!({"resource": resource}))
            .collect::<Vec<_>>()
    })
}

/// Builds a registry from the core parameters and the fixture bundle.
pub fn registry() -> Arc<SearchParameterRegistry> {
    let definitions = SearchParameterLoader::new()
        .load_from_json(&search_parameter_bundle())
        .expect("fixture bundle loads");
    let mut builder = SearchParameterRegistryBuilder::new()
        .with_core_parameters()
        .with_resource_types(["Group", "Practitioner", "Organization"]);
    builder
        .register_all(definitions)
        .expect("fixture definitions register");
    Arc::new(builder.build())
}

/// Creates an indexer over the fixture registry.
pub fn indexer(registry: &Arc<SearchParameterRegistry>) -> SearchIndexer {
    SearchIndexer::new(registry.clone(), Arc::new(JsonPathEvaluator::new()))
}

/// Creates a query compiler over the fixture registry.
pub fn factory(config: SearchConfig) -> SearchOptionsFactory {
    SearchOptionsFactory::with_defaults(registry(), config)
}

/// Assigns model ids to everything in the registry.
pub fn model_ids(registry: &SearchParameterRegistry) -> Arc<InMemoryModelIds> {
    Arc::new(InMemoryModelIds::from_registry(registry))
}

/// Returns the entries extracted for one parameter code.
pub fn entries_for<'a>(entries: &'a [SearchIndexEntry], code: &str) -> Vec<&'a SearchIndexEntry> {
    entries
        .iter()
        .filter(|e| e.definition.code == code)
        .collect()
}

/// A patient with one name, a gender and a birth date.
pub fn patient(id: &str, family: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "meta": {"versionId": "1", "lastUpdated": "2024-03-01T09:15:00Z"},
        "name": [{"family": family, "given": ["Ada"]}],
        "gender": "female",
        "birthDate": "1985-06-21",
        "generalPractitioner": [{"reference": "Practitioner/pr1"}]
    })
}

/// A blood pressure observation with two coded components.
///
/// The systolic component carries two codings, so the composite value has
/// two alternatives for its code and one for its quantity.
pub fn blood_pressure(id: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "meta": {"versionId": "2", "lastUpdated": "2024-03-02T10:00:00Z"},
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "85354-9"}]},
        "subject": {"reference": format!("Patient/{}", patient_id)},
        "component": [
            {
                "code": {"coding": [
                    {"system": "http://loinc.org", "code": "8480-6"},
                    {"system": "http://snomed.info/sct", "code": "271649006"}
                ]},
                "valueQuantity": {
                    "value": 120,
                    "system": "http://unitsofmeasure.org",
                    "code": "mm[Hg]"
                }
            },
            {
                "code": {"coding": [{"system": "http://loinc.org", "code": "8462-4"}]},
                "valueQuantity": {
                    "value": 80,
                    "system": "http://unitsofmeasure.org",
                    "code": "mm[Hg]"
                }
            }
        ]
    })
}

/// A risk assessment with one point and one range probability.
pub fn risk_assessment(id: &str) -> Value {
    json!({
        "resourceType": "RiskAssessment",
        "id": id,
        "status": "final",
        "prediction": [
            {"probabilityDecimal": 0.25},
            {"probabilityRange": {"low": {"value": 0.1}, "high": {"value": 0.4}}}
        ]
    })
}
