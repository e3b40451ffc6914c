//! Resource payload rows.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec::ResourceCodec;
use crate::error::CodecError;

/// A resource version as handed to the write path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    /// Resource type.
    pub resource_type: String,
    /// Logical id.
    pub resource_id: String,
    /// Version number being written.
    pub version: i32,
    /// Last-updated instant.
    pub last_updated: DateTime<Utc>,
    /// Canonical resource JSON.
    pub raw_resource: String,
    /// The version is a delete marker.
    pub is_deleted: bool,
    /// HTTP method of the request that produced this version.
    pub request_method: Option<String>,
}

impl ResourceRecord {
    /// Creates a record for a resource JSON document.
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        version: i32,
        last_updated: DateTime<Utc>,
        raw_resource: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            version,
            last_updated,
            raw_resource: raw_resource.into(),
            is_deleted: false,
            request_method: None,
        }
    }

    /// Marks the record as a delete marker.
    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Sets the request method.
    pub fn with_request_method(mut self, method: impl Into<String>) -> Self {
        self.request_method = Some(method.into());
        self
    }
}

/// Write flags attached to a resource row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResourceWriteOptions {
    /// Keep the replaced version as history.
    pub keep_history: bool,
    /// Reject the write unless the stored version is exactly one behind.
    pub require_version_increment: bool,
    /// The row is a history entry rather than the current version.
    pub is_history: bool,
}

/// The row holding a resource's compressed payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceRow {
    /// Resource type id.
    pub resource_type_id: i16,
    /// Resource surrogate id.
    pub resource_surrogate_id: i64,
    /// Logical id.
    pub resource_id: String,
    /// Version number.
    pub version: i32,
    /// Version the store must currently hold, when a version increment is required.
    pub compared_version: Option<i32>,
    /// Delete marker.
    pub is_deleted: bool,
    /// History entry.
    pub is_history: bool,
    /// Keep the replaced version as history.
    pub keep_history: bool,
    /// Compressed payload.
    #[serde(skip)]
    pub raw_resource: Vec<u8>,
    /// HTTP method of the request that produced this version.
    pub request_method: Option<String>,
}

/// Builds [`ResourceRow`]s, compressing the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceRowGenerator {
    codec: ResourceCodec,
}

impl ResourceRowGenerator {
    /// Creates a generator using a codec.
    pub fn new(codec: ResourceCodec) -> Self {
        Self { codec }
    }

    /// Builds the payload row for a record.
    pub fn generate(
        &self,
        resource_type_id: i16,
        resource_surrogate_id: i64,
        record: &ResourceRecord,
        options: ResourceWriteOptions,
    ) -> Result<ResourceRow, CodecError> {
        Ok(ResourceRow {
            resource_type_id,
            resource_surrogate_id,
            resource_id: record.resource_id.clone(),
            version: record.version,
            compared_version: options
                .require_version_increment
                .then(|| record.version - 1),
            is_deleted: record.is_deleted,
            is_history: options.is_history,
            keep_history: options.keep_history,
            raw_resource: self.codec.write(&record.raw_resource)?,
            request_method: record.request_method.clone(),
        })
    }
}
