//! Snapshot serializers.
//!
//! A serializer turns a [`StateDocument`] (the aggregate's serde state plus
//! the aggregate type and version it was captured at) into bytes. JSON and
//! BSON are the base encodings; [`GzipSerializer`] decorates either of them.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use chronicle_core::aggregate::{Aggregate, Snapshottable};
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Compression, ContentType};

/// Envelope written into every snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Aggregate type the state belongs to.
    pub aggregate_type: String,
    /// Version the state was captured at.
    pub version: i64,
    /// Serde representation of the aggregate.
    pub state: serde_json::Value,
}

impl StateDocument {
    /// Captures `aggregate` into a document.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the aggregate cannot be
    /// represented as JSON.
    pub fn capture<A: Snapshottable>(aggregate: &A) -> Result<Self, DomainError> {
        let state = serde_json::to_value(aggregate)
            .map_err(|e| DomainError::Serialization(e.to_string()))?;
        Ok(Self {
            aggregate_type: A::AGGREGATE_TYPE.to_owned(),
            version: aggregate.version(),
            state,
        })
    }

    /// Rebuilds the aggregate held by this document.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Deserialization` if the document belongs to
    /// another aggregate type or the state does not fit `A`.
    pub fn into_aggregate<A: Snapshottable>(self) -> Result<A, DomainError> {
        ensure_type(&self, A::AGGREGATE_TYPE)?;
        serde_json::from_value(self.state).map_err(|e| DomainError::Deserialization(e.to_string()))
    }
}

fn ensure_type(document: &StateDocument, aggregate_type: &str) -> Result<(), DomainError> {
    if document.aggregate_type == aggregate_type {
        Ok(())
    } else {
        Err(DomainError::Deserialization(format!(
            "snapshot holds a {} aggregate, expected {aggregate_type}",
            document.aggregate_type
        )))
    }
}

/// Encodes and decodes snapshot payloads.
pub trait SnapshotSerializer: Send + Sync + fmt::Debug {
    /// Encodes a state document.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` on encoding failure.
    fn serialize(&self, document: &StateDocument) -> Result<Vec<u8>, DomainError>;

    /// Decodes bytes produced by [`SnapshotSerializer::serialize`],
    /// rejecting documents of another aggregate type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Deserialization` for corrupt input or a type
    /// mismatch.
    fn deserialize(&self, bytes: &[u8], aggregate_type: &str) -> Result<StateDocument, DomainError>;

    /// Content type of the base encoding.
    fn content_type(&self) -> ContentType;

    /// Compression applied on top of the base encoding.
    fn compression(&self) -> Compression {
        Compression::None
    }
}

/// Human-readable JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl SnapshotSerializer for JsonSerializer {
    fn serialize(&self, document: &StateDocument) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(document).map_err(|e| DomainError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8], aggregate_type: &str) -> Result<StateDocument, DomainError> {
        let document: StateDocument = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::Deserialization(e.to_string()))?;
        ensure_type(&document, aggregate_type)?;
        Ok(document)
    }

    fn content_type(&self) -> ContentType {
        ContentType::Json
    }
}

/// Compact binary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonSerializer;

impl SnapshotSerializer for BsonSerializer {
    fn serialize(&self, document: &StateDocument) -> Result<Vec<u8>, DomainError> {
        bson::to_vec(document).map_err(|e| DomainError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8], aggregate_type: &str) -> Result<StateDocument, DomainError> {
        let document: StateDocument =
            bson::from_slice(bytes).map_err(|e| DomainError::Deserialization(e.to_string()))?;
        ensure_type(&document, aggregate_type)?;
        Ok(document)
    }

    fn content_type(&self) -> ContentType {
        ContentType::Bson
    }
}

/// Gzip decorator around another serializer.
pub struct GzipSerializer {
    inner: Box<dyn SnapshotSerializer>,
    level: flate2::Compression,
}

impl GzipSerializer {
    /// Wraps `inner` with default compression.
    #[must_use]
    pub fn new(inner: Box<dyn SnapshotSerializer>) -> Self {
        Self::with_level(inner, flate2::Compression::default())
    }

    /// Wraps `inner` with an explicit compression level.
    #[must_use]
    pub fn with_level(inner: Box<dyn SnapshotSerializer>, level: flate2::Compression) -> Self {
        Self { inner, level }
    }
}

impl fmt::Debug for GzipSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipSerializer")
            .field("inner", &self.inner)
            .field("level", &self.level.level())
            .finish()
    }
}

impl SnapshotSerializer for GzipSerializer {
    fn serialize(&self, document: &StateDocument) -> Result<Vec<u8>, DomainError> {
        let raw = self.inner.serialize(document)?;
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), self.level);
        encoder
            .write_all(&raw)
            .map_err(|e| DomainError::Serialization(format!("gzip: {e}")))?;
        encoder
            .finish()
            .map_err(|e| DomainError::Serialization(format!("gzip: {e}")))
    }

    fn deserialize(&self, bytes: &[u8], aggregate_type: &str) -> Result<StateDocument, DomainError> {
        let mut raw = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut raw)
            .map_err(|e| DomainError::Deserialization(format!("gzip: {e}")))?;
        self.inner.deserialize(&raw, aggregate_type)
    }

    fn content_type(&self) -> ContentType {
        self.inner.content_type()
    }

    fn compression(&self) -> Compression {
        Compression::Gzip
    }
}

/// Builds the serializer for a content type and compression pair.
#[must_use]
pub fn serializer_for(content_type: ContentType, compression: Compression) -> Box<dyn SnapshotSerializer> {
    let base: Box<dyn SnapshotSerializer> = match content_type {
        ContentType::Json => Box::new(JsonSerializer),
        ContentType::Bson => Box::new(BsonSerializer),
    };
    match compression {
        Compression::None => base,
        Compression::Gzip => Box::new(GzipSerializer::new(base)),
    }
}
