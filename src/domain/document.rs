use std::collections::HashMap;

/// String metadata travelling with a document (selected request headers on write,
/// configured response headers on read).
pub type DocMetadata = HashMap<String, String>;

/// A document as stored under one key: raw body bytes, metadata and content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub body: Vec<u8>,
    pub metadata: DocMetadata,
    pub hash: String,
}

impl Document {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            metadata: DocMetadata::new(),
            hash: String::new(),
        }
    }

    pub fn with_hash(body: impl Into<Vec<u8>>, hash: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            metadata: DocMetadata::new(),
            hash: hash.into(),
        }
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }
}
