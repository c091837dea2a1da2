//! Data provider contract and the map-backed reference implementation.
//!
//! The engine consumes a capability set: scalar values, re-iterable
//! collections, image payloads, optional document metadata, and an optional
//! collection-count fast path for the streaming strategy.

use std::collections::BTreeMap;

use base64::Engine as _;

use crate::metadata::DocumentMetadata;
use crate::value::Value;

/// A finite, non-restartable iterator of collection items for one pass.
pub type ValueIter<'a> = Box<dyn Iterator<Item = Value> + 'a>;

/// Access to the named values, collections, images, and metadata a template
/// requires.
///
/// `items` must be re-callable: the engine requests a fresh iterator each
/// time the same collection backs another repeat region, and never rewinds
/// within a single call. `value` and `image` are called at most once per
/// substitution.
pub trait DataProvider {
    /// Scalar or structured value for a `${var}` or the root of `${var.path}`.
    fn value(&self, name: &str) -> Option<Value>;

    /// A fresh iterator over the named collection, or `None` if unknown.
    fn items(&self, name: &str) -> Option<ValueIter<'_>>;

    /// Raw image payload for an image marker. Format is detected from magic
    /// bytes downstream.
    fn image(&self, name: &str) -> Option<Vec<u8>>;

    /// Document metadata to stamp into the output package.
    fn metadata(&self) -> Option<DocumentMetadata> {
        None
    }

    /// Number of items in the named collection, when cheaply known.
    ///
    /// Purely an optimization: when absent, the streaming strategy
    /// materializes one pass of the iterator to count.
    fn item_count(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }
}

/// A `BTreeMap`-backed provider, convenient for tests and simple hosts.
#[derive(Default)]
pub struct MapProvider {
    values: BTreeMap<String, Value>,
    collections: BTreeMap<String, Vec<Value>>,
    images: BTreeMap<String, Vec<u8>>,
    metadata: Option<DocumentMetadata>,
}

impl MapProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scalar value.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Register a collection.
    #[must_use]
    pub fn with_items(mut self, name: &str, items: Vec<Value>) -> Self {
        self.collections.insert(name.to_string(), items);
        self
    }

    /// Register an image payload.
    #[must_use]
    pub fn with_image(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(name.to_string(), bytes);
        self
    }

    /// Register an image from a base64 string (optionally a `data:` URI).
    #[must_use]
    pub fn with_image_base64(mut self, name: &str, encoded: &str) -> Self {
        let payload = encoded.rsplit_once("base64,").map_or(encoded, |(_, b)| b);
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
            self.images.insert(name.to_string(), bytes);
        }
        self
    }

    /// Register document metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl DataProvider for MapProvider {
    fn value(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn items(&self, name: &str) -> Option<ValueIter<'_>> {
        self.collections
            .get(name)
            .map(|items| Box::new(items.iter().cloned()) as ValueIter<'_>)
    }

    fn image(&self, name: &str) -> Option<Vec<u8>> {
        self.images.get(name).cloned()
    }

    fn metadata(&self) -> Option<DocumentMetadata> {
        self.metadata.clone()
    }

    fn item_count(&self, name: &str) -> Option<usize> {
        self.collections.get(name).map(Vec::len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn map_provider_round_trips() {
        let provider = MapProvider::new()
            .with_value("title", "Q4 Report")
            .with_items("rows", vec![Value::from(1i64), Value::from(2i64)]);

        assert_eq!(provider.value("title").unwrap().display_text(), "Q4 Report");
        assert_eq!(provider.item_count("rows"), Some(2));
        assert!(provider.value("missing").is_none());
        assert!(provider.items("missing").is_none());
    }

    #[test]
    fn items_are_re_iterable() {
        let provider = MapProvider::new().with_items("c", vec![Value::from("a"), Value::from("b")]);
        let first: Vec<String> = provider
            .items("c")
            .unwrap()
            .map(|v| v.display_text())
            .collect();
        let second: Vec<String> = provider
            .items("c")
            .unwrap()
            .map(|v| v.display_text())
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["a", "b"]);
    }

    #[test]
    fn base64_images_decode() {
        // 1x1 PNG header prefix is enough for the decode path.
        let provider = MapProvider::new().with_image_base64("logo", "iVBORw0KGgo=");
        let bytes = provider.image("logo").unwrap();
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }
}
