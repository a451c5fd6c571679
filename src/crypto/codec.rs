//! Persistence-boundary codec for sensitive attributes
//!
//! Which attributes are sensitive is plain annotation data
//! ([`SensitiveSchema`]). [`RecordCodec`] seals a record on its way to the
//! store and opens it on the way back, so callers only ever see plaintext
//! values and each value is transformed exactly once per store/load.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{CofferError, CofferResult};

use super::encryption::FieldCipher;

/// Sensitive attribute names per entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitiveSchema {
    entities: BTreeMap<String, BTreeSet<String>>,
}

impl SensitiveSchema {
    /// An empty schema (nothing is sensitive)
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `fields` of `entity` as sensitive
    pub fn with_entity(mut self, entity: &str, fields: &[&str]) -> Self {
        self.entities
            .entry(entity.to_string())
            .or_default()
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Annotations for the wealth-tracker store
    pub fn wealth_tracker() -> Self {
        Self::new()
            .with_entity("asset", &["name", "allocation", "geo_allocation", "notes", "todo"])
            .with_entity("bank", &["name", "notes"])
            .with_entity("account", &["label"])
            .with_entity("user", &["email"])
    }

    /// Whether `field` of `entity` must be encrypted at rest
    pub fn is_sensitive(&self, entity: &str, field: &str) -> bool {
        self.entities
            .get(entity)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Sensitive fields of `entity`, in name order
    pub fn fields(&self, entity: &str) -> impl Iterator<Item = &str> {
        self.entities
            .get(entity)
            .into_iter()
            .flat_map(|fields| fields.iter().map(String::as_str))
    }

    /// Entities with at least one sensitive field
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

/// A record that failed to open during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptedRecord {
    pub entity: String,
    pub id: String,
    pub field: String,
}

/// Outcome of opening every record of a store
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub total_scanned: usize,
    pub corrupted: Vec<CorruptedRecord>,
}

impl ScanReport {
    /// True when every scanned record opened
    pub fn passed(&self) -> bool {
        self.corrupted.is_empty()
    }
}

/// Seals and opens records at the persistence boundary
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec<'a> {
    cipher: &'a FieldCipher,
    schema: &'a SensitiveSchema,
}

impl<'a> RecordCodec<'a> {
    pub fn new(cipher: &'a FieldCipher, schema: &'a SensitiveSchema) -> Self {
        Self { cipher, schema }
    }

    /// Encrypt the sensitive attributes of a plaintext record
    ///
    /// Each sensitive value is stored as a text token of its canonical
    /// encoding; `null` stays `null`. Other attributes pass through.
    pub fn seal(&self, entity: &str, record: &Map<String, Value>) -> CofferResult<Map<String, Value>> {
        let mut sealed = record.clone();
        for field in self.schema.fields(entity) {
            if let Some(value) = sealed.get_mut(field) {
                if value.is_null() {
                    continue;
                }
                let token = self.cipher.encode_value(&*value)?;
                *value = Value::String(base64_token(&token));
            }
        }
        Ok(sealed)
    }

    /// Decrypt the sensitive attributes of a stored record
    ///
    /// A sensitive attribute that fails to decode fails the whole record
    /// with [`CofferError::Authentication`]; it is never read as empty.
    pub fn open(&self, entity: &str, record: &Map<String, Value>) -> CofferResult<Map<String, Value>> {
        let mut opened = record.clone();
        for field in self.schema.fields(entity) {
            if let Some(value) = opened.get_mut(field) {
                if value.is_null() {
                    continue;
                }
                *value = self.open_value(value).map_err(|e| {
                    warn!(entity, field, "sensitive attribute failed to decode");
                    e
                })?;
            }
        }
        Ok(opened)
    }

    fn open_value(&self, value: &Value) -> CofferResult<Value> {
        let text = value.as_str().ok_or(CofferError::Authentication)?;
        let token = decode_base64_token(text)?;
        self.cipher.decode_value(&token)
    }

    /// Open every record and report the ones that fail
    ///
    /// `records` yields `(id, record)` pairs of one entity.
    pub fn scan<'r, I>(&self, entity: &str, records: I) -> ScanReport
    where
        I: IntoIterator<Item = (String, &'r Map<String, Value>)>,
    {
        let mut report = ScanReport::default();
        for (id, record) in records {
            report.total_scanned += 1;
            for field in self.schema.fields(entity) {
                let Some(value) = record.get(field) else {
                    continue;
                };
                if !value.is_null() && self.open_value(value).is_err() {
                    report.corrupted.push(CorruptedRecord {
                        entity: entity.to_string(),
                        id: id.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }
        report
    }
}

fn base64_token(token: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(token)
}

fn decode_base64_token(text: &str) -> CofferResult<Vec<u8>> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| CofferError::Authentication)
}
