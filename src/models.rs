//! Core data models used throughout the advisor.
//!
//! These types represent the documents, chunks, vector records, and
//! conversation messages that flow through ingestion, retrieval, and chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdvisorError, Result};
use crate::extract::sha256_hex;

/// Maximum length of a user identifier.
const MAX_USER_ID_LEN: usize = 64;

/// Validated user identifier.
///
/// Only ASCII alphanumerics, `_` and `-` are allowed, so an id always maps
/// to exactly one directory directly under the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_USER_ID_LEN {
            return Err(AdvisorError::Configuration(format!(
                "user id must be 1-{} characters, got {}",
                MAX_USER_ID_LEN,
                raw.len()
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AdvisorError::Configuration(format!(
                "user id contains invalid characters: {:?}",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An uploaded document and its extracted text.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub raw_bytes: Vec<u8>,
    pub extracted_text: String,
    /// SHA-256 of `raw_bytes`, lowercase hex.
    pub content_hash: String,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(name: impl Into<String>, raw_bytes: Vec<u8>, extracted_text: String) -> Self {
        let content_hash = sha256_hex(&raw_bytes);
        Self {
            name: name.into(),
            raw_bytes,
            extracted_text,
            content_hash,
            uploaded_at: Utc::now(),
        }
    }
}

/// A contiguous segment of a document's text.
///
/// Offsets are character offsets into the extracted text; `end_offset` is
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source_document: String,
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// SHA-256 of `text`, lowercase hex.
    pub hash: String,
}

/// Stored embedding row inside a user's collection.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// SHA-256 of `chunk_text`; the dedup key.
    pub id: String,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

impl VectorRecord {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.hash.clone(),
            chunk_text: chunk.text.clone(),
            embedding,
            metadata: serde_json::json!({
                "source_document": chunk.source_document,
                "chunk_index": chunk.index,
                "start_offset": chunk.start_offset,
                "end_offset": chunk.end_offset,
            }),
        }
    }
}

/// A retrieval hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on messages that carry the full text of an uploaded document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            document: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User message injecting the extracted text of `name`.
    pub fn document(name: &str, text: &str) -> Self {
        Self {
            role: Role::User,
            content: format!("Uploaded Document: {}\n\n{}", name, text),
            document: Some(name.to_string()),
        }
    }

    pub fn is_document(&self) -> bool {
        self.document.is_some()
    }
}

/// Titled text sections in first-seen order. A repeated title replaces the
/// earlier text but keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections(Vec<(String, String)>);

impl Sections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: impl Into<String>, text: impl Into<String>) {
        let title = title.into();
        let text = text.into();
        match self.0.iter_mut().find(|(t, _)| *t == title) {
            Some(entry) => entry.1 = text,
            None => self.0.push((title, text)),
        }
    }

    pub fn get(&self, title: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, text)| text.as_str())
    }

    fn get_mut(&mut self, title: &str) -> Option<&mut String> {
        self.0
            .iter_mut()
            .find(|(t, _)| t == title)
            .map(|(_, text)| text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(t, v)| (t.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Blank-line separated `Key: value` blocks; blocks without a colon are dropped.
    pub fn from_blocks(text: &str) -> Self {
        let mut sections = Self::new();
        for block in text.split("\n\n") {
            if let Some((key, value)) = block.split_once(':') {
                sections.insert(key.trim(), value.trim());
            }
        }
        sections
    }

    /// `Title: text` lines; lines without a colon continue the previous section.
    pub fn from_lines(text: &str) -> Self {
        let mut sections = Self::new();
        let mut current: Option<String> = None;
        for line in text.lines() {
            if let Some((title, body)) = line.split_once(':') {
                let title = title.trim().to_string();
                sections.insert(title.clone(), body.trim());
                current = Some(title);
            } else if let Some(title) = &current {
                if let Some(text) = sections.get_mut(title) {
                    text.push(' ');
                    text.push_str(line.trim());
                }
            }
        }
        sections
    }
}

impl Serialize for Sections {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (title, text) in &self.0 {
            map.serialize_entry(title, text)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_messages_are_tagged() {
        let m = Message::document("c.txt", "Net 30");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "Uploaded Document: c.txt\n\nNet 30");
        assert!(m.is_document());
        assert!(!Message::user("Uploaded Document: c.txt").is_document());

        let json = serde_json::to_value(Message::assistant("ok")).unwrap();
        assert!(json.get("document").is_none());
    }

    #[test]
    fn user_id_accepts_safe_names() {
        assert_eq!(UserId::parse("alice_01-b").unwrap().as_str(), "alice_01-b");
    }

    #[test]
    fn user_id_rejects_path_traversal() {
        assert!(UserId::parse("../bob").is_err());
        assert!(UserId::parse("a/b").is_err());
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse(&"x".repeat(65)).is_err());
    }

    #[test]
    fn document_hash_is_computed_from_bytes() {
        let doc = Document::new("a.txt", b"abc".to_vec(), "abc".to_string());
        assert_eq!(
            doc.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn record_id_is_chunk_hash() {
        let chunk = Chunk {
            source_document: "a.txt".to_string(),
            index: 2,
            text: "clause".to_string(),
            start_offset: 10,
            end_offset: 16,
            hash: sha256_hex(b"clause"),
        };
        let record = VectorRecord::from_chunk(&chunk, vec![0.5]);
        assert_eq!(record.id, chunk.hash);
        assert_eq!(record.metadata["chunk_index"], 2);
    }

    #[test]
    fn blocks_parse_into_ordered_sections() {
        let s = Sections::from_blocks(
            "Contract type: Supply agreement\n\nKey terms: delivery, price\n\nno colon here",
        );
        assert_eq!(s.len(), 2);
        let titles: Vec<&str> = s.iter().map(|(t, _)| t).collect();
        assert_eq!(titles, vec!["Contract type", "Key terms"]);
        assert_eq!(s.get("Key terms"), Some("delivery, price"));
    }

    #[test]
    fn lines_continue_previous_section() {
        let s = Sections::from_lines("preamble\nSubject: development of\na web app\nPrice: 100");
        assert_eq!(s.get("Subject"), Some("development of a web app"));
        assert_eq!(s.get("Price"), Some("100"));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn sections_serialize_as_object_in_order() {
        let mut s = Sections::new();
        s.insert("b", "2");
        s.insert("a", "1");
        assert_eq!(serde_json::to_string(&s).unwrap(), r#"{"b":"2","a":"1"}"#);
    }
}
