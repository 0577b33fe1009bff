//! Query fingerprints (cache key codec)
//!
//! A fingerprint is `"{collection}:{blake3-hex}"` where the hash covers a
//! canonical encoding of the normalized [`QueryShape`]:
//! - filter fields sorted by name, nested objects sorted by key
//! - sort keys kept in order (their order changes the result)
//! - pagination, locale and currency included
//!
//! Two shapes that normalize identically hash identically. Every value is
//! length-prefixed and type-tagged so distinct shapes cannot share an
//! encoding.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::common::utils::is_valid_collection;

/// Domain separation for the fingerprint hash. Bump when the encoding changes.
const FINGERPRINT_DOMAIN: &[u8] = b"storegate.fingerprint.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

/// Logical description of a read against one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryShape {
    pub filter: BTreeMap<String, Value>,
    pub sort: Vec<SortKey>,
    pub page: Option<Page>,
    pub locale: Option<String>,
    pub currency: Option<String>,
}

impl QueryShape {
    /// Create a new, empty shape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter; filter order never affects the fingerprint.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    /// Append a sort key. Sort order is significant.
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    /// Set the page window.
    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.page = Some(Page { offset, limit });
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}

/// Stable cache key for one (collection, query) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection the fingerprint was computed for.
    pub fn collection(&self) -> &str {
        self.0.split_once(':').map(|(c, _)| c).unwrap_or(&self.0)
    }

    /// Hex digest of the canonical query encoding, without the collection.
    pub fn digest(&self) -> &str {
        self.0.split_once(':').map(|(_, d)| d).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the fingerprint of a query.
///
/// # Panics
///
/// Panics if `collection` is not a valid collection name. Callers that take
/// collection names from untrusted input must check them with
/// [`crate::common::utils::validate_collection`] first.
pub fn fingerprint(collection: &str, shape: &QueryShape) -> Fingerprint {
    assert!(
        is_valid_collection(collection),
        "unsupported collection name for fingerprinting: {:?}",
        collection
    );

    let mut enc = Encoder::new();
    enc.bytes(FINGERPRINT_DOMAIN);
    enc.str(collection);

    enc.len(shape.filter.len());
    for (field, value) in &shape.filter {
        enc.str(field);
        enc.value(value);
    }

    enc.len(shape.sort.len());
    for key in &shape.sort {
        enc.str(&key.field);
        enc.tag(match key.direction {
            SortDirection::Asc => 0,
            SortDirection::Desc => 1,
        });
    }

    match shape.page {
        Some(page) => {
            enc.tag(1);
            enc.u64(page.offset);
            enc.u64(page.limit);
        }
        None => enc.tag(0),
    }

    enc.opt_str(shape.locale.as_deref().map(normalize_locale).as_deref());
    enc.opt_str(
        shape
            .currency
            .as_deref()
            .map(|c| c.trim().to_ascii_uppercase())
            .as_deref(),
    );

    Fingerprint(format!("{}:{}", collection, enc.finish()))
}

/// `en_us`, `EN-US` and `en-US` all select the same payload.
fn normalize_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_ascii_lowercase()
}

/// Canonical, self-delimiting encoding fed straight into the hasher.
struct Encoder {
    hasher: Hasher,
}

impl Encoder {
    fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    fn tag(&mut self, tag: u8) {
        self.hasher.update(&[tag]);
    }

    fn u64(&mut self, n: u64) {
        self.hasher.update(&n.to_le_bytes());
    }

    fn len(&mut self, n: usize) {
        self.u64(n as u64);
    }

    fn bytes(&mut self, data: &[u8]) {
        self.len(data.len());
        self.hasher.update(data);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.tag(1);
                self.str(s);
            }
            None => self.tag(0),
        }
    }

    fn value(&mut self, value: &Value) {
        match value {
            Value::Null => self.tag(0),
            Value::Bool(b) => {
                self.tag(1);
                self.tag(*b as u8);
            }
            Value::Number(n) => {
                self.tag(2);
                self.str(&n.to_string());
            }
            Value::String(s) => {
                self.tag(3);
                self.str(s);
            }
            Value::Array(items) => {
                self.tag(4);
                self.len(items.len());
                for item in items {
                    self.value(item);
                }
            }
            Value::Object(map) => {
                self.tag(5);
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                self.len(entries.len());
                for (key, item) in entries {
                    self.str(key);
                    self.value(item);
                }
            }
        }
    }

    fn finish(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}
