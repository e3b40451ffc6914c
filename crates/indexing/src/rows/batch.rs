//! Batch assembly.
//!
//! A [`RowBatch`] collects the rows of one bulk write. It owns one dedup set
//! per row kind, so equivalent facts extracted twice from a resource (or
//! case variants of the same string) produce a single row. Resources may be
//! processed in parallel by giving each worker its own batch from
//! [`RowBatch::fork`] and merging the results with [`RowBatch::merge`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::composite::{CompositeRow, CompositeRowGenerator};
use super::date::{DateTimeRow, DateTimeRowGenerator};
use super::model::ModelIdResolver;
use super::number::{NumberRow, NumberRowGenerator};
use super::quantity::{QuantityRow, QuantityRowGenerator};
use super::reference::{ReferenceRow, ReferenceRowGenerator};
use super::resource::{ResourceRecord, ResourceRow, ResourceRowGenerator, ResourceWriteOptions};
use super::string::{StringRow, StringRowGenerator};
use super::token::{TokenRow, TokenRowGenerator, TokenTextRow, TokenTextRowGenerator};
use super::uri::{UriRow, UriRowGenerator};
use super::{RowGenerator, RowKey};
use crate::codec::ResourceCodec;
use crate::config::RowLimits;
use crate::error::{IndexingError, IndexingResult};
use crate::search::SearchIndexEntry;
use crate::types::SearchValue;

/// Rows of a batch, by kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchRows {
    /// Resource payload rows.
    pub resources: Vec<ResourceRow>,
    /// String rows.
    pub strings: Vec<StringRow>,
    /// Token rows.
    pub tokens: Vec<TokenRow>,
    /// Token text rows.
    pub token_texts: Vec<TokenTextRow>,
    /// Number rows.
    pub numbers: Vec<NumberRow>,
    /// Quantity rows.
    pub quantities: Vec<QuantityRow>,
    /// Date rows.
    pub dates: Vec<DateTimeRow>,
    /// Reference rows.
    pub references: Vec<ReferenceRow>,
    /// URI rows.
    pub uris: Vec<UriRow>,
    /// Composite rows.
    pub composites: Vec<CompositeRow>,
}

impl BatchRows {
    /// Number of search rows, excluding resource rows.
    pub fn search_row_count(&self) -> usize {
        self.strings.len()
            + self.tokens.len()
            + self.token_texts.len()
            + self.numbers.len()
            + self.quantities.len()
            + self.dates.len()
            + self.references.len()
            + self.uris.len()
            + self.composites.len()
    }
}

#[derive(Debug, Default)]
struct SeenRows {
    resources: HashSet<(i16, i64)>,
    strings: HashSet<StringRow>,
    tokens: HashSet<TokenRow>,
    token_texts: HashSet<TokenTextRow>,
    numbers: HashSet<NumberRow>,
    quantities: HashSet<QuantityRow>,
    dates: HashSet<DateTimeRow>,
    references: HashSet<ReferenceRow>,
    uris: HashSet<UriRow>,
    composites: HashSet<CompositeRow>,
}

#[derive(Debug, Clone)]
struct Generators {
    string: StringRowGenerator,
    token: TokenRowGenerator,
    token_text: TokenTextRowGenerator,
    number: NumberRowGenerator,
    quantity: QuantityRowGenerator,
    date: DateTimeRowGenerator,
    reference: ReferenceRowGenerator,
    uri: UriRowGenerator,
    composite: CompositeRowGenerator,
    resource: ResourceRowGenerator,
}

/// Rows of one bulk write.
pub struct RowBatch {
    ids: Arc<dyn ModelIdResolver>,
    generators: Generators,
    rows: BatchRows,
    seen: SeenRows,
}

impl RowBatch {
    /// Creates an empty batch.
    pub fn new(ids: Arc<dyn ModelIdResolver>, limits: RowLimits) -> Self {
        let string = StringRowGenerator::new(limits.string_max_indexed_length);
        let token = TokenRowGenerator::new(Arc::clone(&ids), limits.token_code_max_length);
        let quantity = QuantityRowGenerator::new(Arc::clone(&ids));
        let reference =
            ReferenceRowGenerator::new(Arc::clone(&ids), limits.reference_id_max_length);

        let generators = Generators {
            composite: CompositeRowGenerator::new(
                string,
                token.clone(),
                quantity.clone(),
                reference.clone(),
            ),
            string,
            token,
            token_text: TokenTextRowGenerator::new(limits.string_max_indexed_length),
            number: NumberRowGenerator::new(),
            quantity,
            date: DateTimeRowGenerator::new(),
            reference,
            uri: UriRowGenerator::new(),
            resource: ResourceRowGenerator::default(),
        };

        Self {
            ids,
            generators,
            rows: BatchRows::default(),
            seen: SeenRows::default(),
        }
    }

    /// Uses a specific payload codec.
    pub fn with_codec(mut self, codec: ResourceCodec) -> Self {
        self.generators.resource = ResourceRowGenerator::new(codec);
        self
    }

    /// Creates an empty batch with the same generators, for a parallel worker.
    pub fn fork(&self) -> Self {
        Self {
            ids: Arc::clone(&self.ids),
            generators: self.generators.clone(),
            rows: BatchRows::default(),
            seen: SeenRows::default(),
        }
    }

    /// Adds a resource version and the rows for its index entries.
    ///
    /// Returns the number of search rows added. Entries whose parameter has
    /// no model id are skipped.
    pub fn add_resource(
        &mut self,
        cancel: &CancellationToken,
        record: &ResourceRecord,
        resource_surrogate_id: i64,
        options: ResourceWriteOptions,
        entries: &[SearchIndexEntry],
    ) -> IndexingResult<usize> {
        if cancel.is_cancelled() {
            return Err(IndexingError::Cancelled);
        }

        let resource_type_id = self.ids.resource_type_id(&record.resource_type).ok_or_else(|| {
            IndexingError::UnknownModelId {
                kind: "resource type",
                name: record.resource_type.clone(),
            }
        })?;

        let row = self.generators.resource.generate(
            resource_type_id,
            resource_surrogate_id,
            record,
            options,
        )?;
        if self.seen.resources.insert((resource_type_id, resource_surrogate_id)) {
            self.rows.resources.push(row);
        }

        // History and delete markers are not searchable
        if record.is_deleted || options.is_history {
            return Ok(0);
        }

        let before = self.rows.search_row_count();
        for entry in entries {
            let Some(search_param_id) = self.ids.search_param_id(&entry.definition) else {
                debug!(param = %entry.definition.label(), "No id for search parameter, skipping");
                continue;
            };
            let key = RowKey::new(resource_type_id, resource_surrogate_id, search_param_id);
            self.add_value(key, &entry.value);
        }
        Ok(self.rows.search_row_count() - before)
    }

    fn add_value(&mut self, key: RowKey, value: &SearchValue) {
        let g = &self.generators;
        let rows = &mut self.rows;
        let seen = &mut self.seen;

        match value {
            SearchValue::String { .. } => {
                push(&g.string, &mut rows.strings, &mut seen.strings, key, value)
            }
            SearchValue::Token { .. } => {
                push(&g.token, &mut rows.tokens, &mut seen.tokens, key, value);
                push(
                    &g.token_text,
                    &mut rows.token_texts,
                    &mut seen.token_texts,
                    key,
                    value,
                );
            }
            SearchValue::Number { .. } => {
                push(&g.number, &mut rows.numbers, &mut seen.numbers, key, value)
            }
            SearchValue::Quantity { .. } => push(
                &g.quantity,
                &mut rows.quantities,
                &mut seen.quantities,
                key,
                value,
            ),
            SearchValue::DateTime { .. } => {
                push(&g.date, &mut rows.dates, &mut seen.dates, key, value)
            }
            SearchValue::Reference { .. } => push(
                &g.reference,
                &mut rows.references,
                &mut seen.references,
                key,
                value,
            ),
            SearchValue::Uri { .. } => push(&g.uri, &mut rows.uris, &mut seen.uris, key, value),
            SearchValue::Composite { .. } => {
                let composites = g
                    .composite
                    .generate_all(key, value, Some(&mut seen.composites));
                rows.composites.extend(composites);
            }
        }
    }

    /// Merges another batch into this one, dropping rows already present.
    pub fn merge(&mut self, other: RowBatch) {
        let g = &self.generators;
        let rows = &mut self.rows;
        let seen = &mut self.seen;
        let other = other.rows;

        for row in other.resources {
            if seen
                .resources
                .insert((row.resource_type_id, row.resource_surrogate_id))
            {
                rows.resources.push(row);
            }
        }
        merge_rows(&g.string, &mut rows.strings, &mut seen.strings, other.strings);
        merge_rows(&g.token, &mut rows.tokens, &mut seen.tokens, other.tokens);
        merge_rows(
            &g.token_text,
            &mut rows.token_texts,
            &mut seen.token_texts,
            other.token_texts,
        );
        merge_rows(&g.number, &mut rows.numbers, &mut seen.numbers, other.numbers);
        merge_rows(
            &g.quantity,
            &mut rows.quantities,
            &mut seen.quantities,
            other.quantities,
        );
        merge_rows(&g.date, &mut rows.dates, &mut seen.dates, other.dates);
        merge_rows(
            &g.reference,
            &mut rows.references,
            &mut seen.references,
            other.references,
        );
        merge_rows(&g.uri, &mut rows.uris, &mut seen.uris, other.uris);
        merge_rows(
            &g.composite,
            &mut rows.composites,
            &mut seen.composites,
            other.composites,
        );
    }

    /// Returns the rows collected so far.
    pub fn rows(&self) -> &BatchRows {
        &self.rows
    }

    /// Consumes the batch, returning its rows.
    pub fn into_rows(self) -> BatchRows {
        self.rows
    }

    /// Number of rows of every kind.
    pub fn len(&self) -> usize {
        self.rows.resources.len() + self.rows.search_row_count()
    }

    /// Returns true if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RowBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowBatch")
            .field("resources", &self.rows.resources.len())
            .field("search_rows", &self.rows.search_row_count())
            .finish()
    }
}

fn push<G: RowGenerator>(
    generator: &G,
    rows: &mut Vec<G::Row>,
    seen: &mut HashSet<G::Row>,
    key: RowKey,
    value: &SearchValue,
) {
    if let Some(row) = generator.generate(key, value, Some(seen)) {
        rows.push(row);
    }
}

fn merge_rows<G: RowGenerator>(
    generator: &G,
    rows: &mut Vec<G::Row>,
    seen: &mut HashSet<G::Row>,
    other: Vec<G::Row>,
) {
    for row in other {
        if seen.insert(generator.dedup_key(&row)) {
            rows.push(row);
        }
    }
}
