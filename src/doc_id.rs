use serde::{Deserialize, Serialize};

/// A stable document identifier derived from (filename, raw bytes).
///
/// Format: `doc_<4 hex of the filename hash>_<8 hex of the content hash>`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a stable document ID from a filename and its raw content.
    pub fn derive(filename: &str, content: &[u8]) -> Self {
        let name_hash = blake3::hash(filename.as_bytes()).to_hex();
        let content_hash = blake3::hash(content).to_hex();
        Self(format!(
            "doc_{}_{}",
            &name_hash.as_str()[..4],
            &content_hash.as_str()[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = DocumentId::derive("notes.txt", b"hello");
        let b = DocumentId::derive("notes.txt", b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let base = DocumentId::derive("notes.txt", b"hello");
        assert_ne!(base, DocumentId::derive("other.txt", b"hello"));
        assert_ne!(base, DocumentId::derive("notes.txt", b"world"));
    }

    #[test]
    fn has_expected_shape() {
        let id = DocumentId::derive("brief.pdf", b"%PDF");
        let s = id.to_string();
        assert!(s.starts_with("doc_"));
        assert_eq!(s.len(), 4 + 4 + 1 + 8);
        assert_eq!(s.as_bytes()[8], b'_');
    }

    #[test]
    fn orders_lexicographically() {
        let a = DocumentId::from("doc_a");
        let b = DocumentId::from("doc_b");
        assert!(a < b);
    }
}
