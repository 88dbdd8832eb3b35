//! Source files and the cache of their parse results.
//!
//! There are several ways to get hold of a source file, so rather than
//! creating a proliferation of methods with subtly-different input types, the
//! engine takes one type that can be created from many.

use std::{fmt::Write as _, path::Path, sync::Arc};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::syntax::{parse_recovering, ParseOutcome};

/// A SHA-256 digest of the contents of a source file.
pub type ContentHash = [u8; 32];

/// An Aurion source file.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceFile {
    pub path:    String,
    pub content: String,
}

impl SourceFile {
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path:    path.into(),
            content: content.into(),
        }
    }

    /// The SHA-256 digest of the file's contents.
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        Sha256::digest(self.content.as_bytes()).into()
    }

    /// The [`Self::content_hash`] as lowercase hexadecimal.
    #[must_use]
    pub fn content_hash_hex(&self) -> String {
        self.content_hash()
            .iter()
            .fold(String::with_capacity(64), |mut hex, byte| {
                let _ = write!(hex, "{byte:02x}");
                hex
            })
    }
}

impl From<(String, String)> for SourceFile {
    /// Creates a source file from the provided tuple of `path` and `content`.
    fn from((path, content): (String, String)) -> Self {
        Self { path, content }
    }
}

impl TryFrom<&Path> for SourceFile {
    type Error = std::io::Error;

    /// Tries to read the source file at the provided `path`.
    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), content))
    }
}

/// A concurrent cache of parse results keyed by path and content hash.
///
/// A changed file hashes differently, so stale entries are never returned.
/// They are only ever replaced, as each path keeps just its latest entry.
#[derive(Debug, Default)]
pub struct ParseCache {
    entries: DashMap<String, (ContentHash, Arc<ParseOutcome>)>,
}

impl ParseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `file`, reusing the previous result if its contents are
    /// unchanged.
    pub fn parse(&self, file: &SourceFile) -> Arc<ParseOutcome> {
        let hash = file.content_hash();
        if let Some(entry) = self.entries.get(&file.path) {
            if entry.0 == hash {
                tracing::debug!(path = %file.path, "parse cache hit");
                return Arc::clone(&entry.1);
            }
        }

        let outcome = Arc::new(parse_recovering(&file.content));
        self.entries
            .insert(file.path.clone(), (hash, Arc::clone(&outcome)));
        outcome
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::source::{ParseCache, SourceFile};

    #[test]
    fn hashes_contents_only() {
        let a = SourceFile::new("a.aur", "contract A {}");
        let b = SourceFile::new("b.aur", "contract A {}");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), SourceFile::new("a.aur", "contract B {}").content_hash());
        assert_eq!(
            SourceFile::new("empty.aur", "").content_hash_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn reuses_results_until_the_file_changes() {
        let cache = ParseCache::new();
        let file = SourceFile::new("a.aur", "contract A {}");

        let first = cache.parse(&file);
        assert!(Arc::ptr_eq(&first, &cache.parse(&file)));

        let changed = SourceFile::new("a.aur", "contract A {\n  x: u64\n}");
        let second = cache.parse(&changed);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.ast.contracts[0].fields.len(), 1);
        assert_eq!(cache.len(), 1);
    }
}
