//! Small integer ids for model names.
//!
//! Rows refer to resource types, search parameters, token systems and
//! quantity codes by compact ids rather than by text.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::warn;

use crate::search::{SearchParameterDefinition, SearchParameterRegistry};

/// Resolves model names to the ids stored in rows.
pub trait ModelIdResolver: Send + Sync {
    /// Returns the id of a resource type.
    fn resource_type_id(&self, resource_type: &str) -> Option<i16>;

    /// Returns the id of a search parameter.
    fn search_param_id(&self, definition: &SearchParameterDefinition) -> Option<i16>;

    /// Returns the id of a token or unit system, assigning one if needed.
    fn system_id(&self, system: &str) -> i32;

    /// Returns the id of a quantity code, assigning one if needed.
    fn quantity_code_id(&self, code: &str) -> i32;
}

/// In-process id tables.
///
/// Resource types and search parameters are registered up front; systems
/// and quantity codes are assigned on first use.
#[derive(Debug, Default)]
pub struct InMemoryModelIds {
    resource_types: HashMap<String, i16>,
    search_params: HashMap<String, i16>,
    systems: RwLock<HashMap<String, i32>>,
    quantity_codes: RwLock<HashMap<String, i32>>,
}

impl InMemoryModelIds {
    /// Creates empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds tables covering every resource type and parameter in a registry.
    pub fn from_registry(registry: &SearchParameterRegistry) -> Self {
        Self::new()
            .with_resource_types(registry.resource_types())
            .with_search_parameters(registry.all().iter().map(|d| d.as_ref()))
    }

    /// Registers resource types. Ids start at 1 in registration order.
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for rt in types {
            Self::register(&mut self.resource_types, rt.into(), "resource type");
        }
        self
    }

    /// Registers search parameters. Ids start at 1; 0 is reserved for
    /// composite components.
    pub fn with_search_parameters<'a, I>(mut self, definitions: I) -> Self
    where
        I: IntoIterator<Item = &'a SearchParameterDefinition>,
    {
        for def in definitions {
            Self::register(
                &mut self.search_params,
                def.identity().to_string(),
                "search parameter",
            );
        }
        self
    }

    /// Gives `name` the next id. Names past the `i16` range stay
    /// unregistered and resolve to `None`.
    fn register(table: &mut HashMap<String, i16>, name: String, kind: &'static str) {
        if table.contains_key(&name) {
            return;
        }
        match i16::try_from(table.len() + 1) {
            Ok(id) => {
                table.insert(name, id);
            }
            Err(_) => warn!(kind, name = %name, "Model id space exhausted, name not registered"),
        }
    }

    fn assign(table: &RwLock<HashMap<String, i32>>, name: &str) -> i32 {
        if let Some(id) = table.read().get(name) {
            return *id;
        }
        let mut table = table.write();
        let next = table.len() as i32 + 1;
        *table.entry(name.to_string()).or_insert(next)
    }
}

impl ModelIdResolver for InMemoryModelIds {
    fn resource_type_id(&self, resource_type: &str) -> Option<i16> {
        self.resource_types.get(resource_type).copied()
    }

    fn search_param_id(&self, definition: &SearchParameterDefinition) -> Option<i16> {
        self.search_params
            .get(&definition.identity().to_string())
            .copied()
    }

    fn system_id(&self, system: &str) -> i32 {
        Self::assign(&self.systems, system)
    }

    fn quantity_code_id(&self, code: &str) -> i32 {
        Self::assign(&self.quantity_codes, code)
    }
}
