//! Per-user ledger of uploaded file hashes (`file_hashes.txt`).
//!
//! One `filename:sha256` pair per line. Lines are split on the last colon,
//! so file names may themselves contain `:`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::db::user_dir;
use crate::error::Result;
use crate::models::UserId;

pub const LEDGER_FILE: &str = "file_hashes.txt";

#[derive(Debug, Clone)]
pub struct HashLedger {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HashLedger {
    /// Load the ledger stored at `{root}/{user}/file_hashes.txt`.
    ///
    /// # Errors
    ///
    /// Returns [`AdvisorError::Io`](crate::error::AdvisorError::Io) when the
    /// file exists but cannot be read.
    pub fn for_user(root: &Path, user: &UserId) -> Result<Self> {
        Self::load(user_dir(root, user).join(LEDGER_FILE))
    }

    /// Load the ledger at `path`; a missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last recorded hash for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|s| s.as_str())
    }

    /// All `name -> hash` pairs, ordered by name.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `hash` for `name` and persist the ledger.
    ///
    /// # Errors
    ///
    /// Fails when the ledger file cannot be written; the in-memory entry is
    /// kept in that case.
    pub fn record(&mut self, name: &str, hash: &str) -> Result<()> {
        self.entries.insert(name.to_string(), hash.to_string());
        self.save()
    }

    /// Empty the ledger on disk.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = String::new();
        for (name, hash) in &self.entries {
            content.push_str(name);
            content.push(':');
            content.push_str(hash);
            content.push('\n');
        }
        let tmp = self.path.with_extension("txt.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn parse(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.rsplit_once(':') {
            Some((name, hash)) if !name.is_empty() && !hash.is_empty() => {
                entries.insert(name.to_string(), hash.to_string());
            }
            _ => tracing::warn!(line = lineno + 1, "skipping malformed hash ledger line"),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let ledger = HashLedger::load(tmp.path().join(LEDGER_FILE)).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn names_with_colons_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("u").join(LEDGER_FILE);
        let mut ledger = HashLedger::load(&path).unwrap();
        ledger.record("scan 10:30.pdf", "abc123").unwrap();
        ledger.record("plain.txt", "def456").unwrap();

        let reloaded = HashLedger::load(&path).unwrap();
        assert_eq!(reloaded.get("scan 10:30.pdf"), Some("abc123"));
        assert_eq!(reloaded.get("plain.txt"), Some("def456"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let entries = parse("good.txt:aa\n\nno-colon-here\n:bb\ncc:\nother.docx:dd\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["good.txt"], "aa");
        assert_eq!(entries["other.docx"], "dd");
    }

    #[test]
    fn clear_truncates_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LEDGER_FILE);
        let mut ledger = HashLedger::load(&path).unwrap();
        ledger.record("a.txt", "11").unwrap();
        ledger.clear().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert!(HashLedger::load(&path).unwrap().is_empty());
    }
}
