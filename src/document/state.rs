//! Document lifecycle management for the scope server.

use std::sync::Arc;

use dashmap::DashMap;
use tower_lsp::lsp_types::{self, Url};
use tracing::{debug, warn};

use crate::grammar::{Grammar, GrammarError, GrammarRegistry, SyntectGrammar};

use super::cache::{CacheOptions, LineCache, TokenInfo};
use super::text::{Edit, Position, TextBuffer};

/// An open document together with its tokenization cache.
#[derive(Debug)]
pub struct DocumentController<G: Grammar = SyntectGrammar> {
    buffer: TextBuffer,
    cache: LineCache<G>,
    /// Language id reported by the client, used to re-resolve grammars.
    pub language_id: String,
    /// Document version from the client.
    pub version: i32,
}

impl<G: Grammar> DocumentController<G> {
    /// Create a controller and tokenize the whole text.
    pub fn new(
        text: &str,
        language_id: impl Into<String>,
        version: i32,
        grammar: Option<Arc<G>>,
        options: CacheOptions,
    ) -> Result<Self, GrammarError> {
        let buffer = TextBuffer::new(text);
        let cache = LineCache::new(&buffer, grammar, options)?;
        Ok(Self {
            buffer,
            cache,
            language_id: language_id.into(),
            version,
        })
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn cache(&self) -> &LineCache<G> {
        &self.cache
    }

    /// Apply a batch of edits that share pre-edit coordinates.
    ///
    /// The text is always updated. A grammar failure leaves the cache stale;
    /// queries re-tokenize stale lines on demand.
    pub fn on_edits(&mut self, mut edits: Vec<Edit>) -> Result<(), GrammarError> {
        edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));
        self.buffer.apply_edits(&edits);
        self.cache.apply_changes(&self.buffer, &edits)
    }

    /// Apply one LSP content change: a UTF-16 range edit, or a full-text
    /// replacement when `range` is absent.
    pub fn apply_content_change(
        &mut self,
        range: Option<lsp_types::Range>,
        text: String,
    ) -> Result<(), GrammarError> {
        match range {
            Some(range) => {
                let range = self.buffer.range_from_lsp(range);
                self.on_edits(vec![Edit::new(range, text)])
            }
            None => self.replace_text(&text),
        }
    }

    /// Replace the whole text and re-tokenize.
    pub fn replace_text(&mut self, text: &str) -> Result<(), GrammarError> {
        self.buffer = TextBuffer::new(text);
        self.cache.refresh(&self.buffer)
    }

    /// Re-tokenize the whole document.
    pub fn refresh(&mut self) -> Result<(), GrammarError> {
        self.cache.refresh(&self.buffer)
    }

    /// Swap the grammar and re-tokenize.
    ///
    /// The new grammar is installed even if tokenizing fails.
    pub fn set_grammar(
        &mut self,
        grammar: Option<Arc<G>>,
        options: CacheOptions,
    ) -> Result<(), GrammarError> {
        self.cache = LineCache::untokenized(grammar, options);
        self.cache.refresh(&self.buffer)
    }

    /// Token and scopes at a byte position.
    pub fn scope_at(&mut self, position: Position) -> Result<TokenInfo, GrammarError> {
        self.cache.scope_at(&self.buffer, position)
    }
}

/// Thread-safe storage for open documents.
///
/// Only documents with a grammar are tracked and answer queries. Documents
/// opened without one keep their text mirrored so a grammar reload can start
/// tracking them. Access goes through per-entry guards, so edits and queries
/// for the same document never interleave.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: DashMap<Url, DocumentController>,
    untracked: DashMap<Url, DocumentController>,
}

impl DocumentStore {
    /// Create a new empty document store.
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            untracked: DashMap::new(),
        }
    }

    /// Start tracking a document, or refresh it with new text if it is
    /// already open.
    ///
    /// A document whose grammar does not resolve is kept untracked.
    pub fn open(
        &self,
        uri: Url,
        text: &str,
        language_id: &str,
        version: i32,
        registry: &GrammarRegistry,
        options: CacheOptions,
    ) -> Result<(), GrammarError> {
        let reopened = self.with_open_document(&uri, |existing| {
            existing.version = version;
            existing.replace_text(text)
        });
        if let Some(result) = reopened {
            debug!(%uri, "document already open, refreshing");
            return result;
        }

        let grammar = registry.resolve(language_id, uri.path());
        let tracked = grammar.is_some();
        let controller = DocumentController::new(text, language_id, version, grammar, options)?;
        if tracked {
            self.documents.insert(uri, controller);
        } else {
            debug!(%uri, language_id, "no grammar for document, not tracking");
            self.untracked.insert(uri, controller);
        }
        Ok(())
    }

    /// Forget a document. Returns whether it was tracked.
    pub fn close(&self, uri: &Url) -> bool {
        self.untracked.remove(uri);
        self.documents.remove(uri).is_some()
    }

    /// Whether the document is open, tracked or not.
    pub fn is_open(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri) || self.untracked.contains_key(uri)
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Run `f` with exclusive access to a tracked document.
    pub fn with_document<R>(
        &self,
        uri: &Url,
        f: impl FnOnce(&mut DocumentController) -> R,
    ) -> Option<R> {
        self.documents.get_mut(uri).map(|mut entry| f(entry.value_mut()))
    }

    /// Run `f` with exclusive access to an open document, tracked or not.
    pub fn with_open_document<R>(
        &self,
        uri: &Url,
        f: impl FnOnce(&mut DocumentController) -> R,
    ) -> Option<R> {
        match self.documents.get_mut(uri) {
            Some(mut entry) => Some(f(entry.value_mut())),
            None => self.untracked.get_mut(uri).map(|mut entry| f(entry.value_mut())),
        }
    }

    /// Re-resolve the grammar of every open document against `registry`.
    ///
    /// Documents that gained a grammar become tracked, documents that lost
    /// theirs stop being tracked. Returns the number of documents that failed
    /// to re-tokenize.
    pub fn reload(&self, registry: &GrammarRegistry, options: CacheOptions) -> usize {
        let uris: Vec<Url> = self
            .documents
            .iter()
            .chain(self.untracked.iter())
            .map(|entry| entry.key().clone())
            .collect();

        let mut failures = 0;
        for uri in uris {
            let removed = self.documents.remove(&uri).or_else(|| self.untracked.remove(&uri));
            let Some((uri, mut doc)) = removed else {
                continue;
            };
            let grammar = registry.resolve(&doc.language_id, uri.path());
            let tracked = grammar.is_some();
            if let Err(err) = doc.set_grammar(grammar, options) {
                warn!(%uri, error = %err, "failed to re-tokenize document");
                failures += 1;
            }
            if tracked {
                self.documents.insert(uri, doc);
            } else {
                debug!(%uri, "no grammar after reload, not tracking");
                self.untracked.insert(uri, doc);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file:///project/{path}")).unwrap()
    }

    fn open(store: &DocumentStore, path: &str, text: &str, language_id: &str) {
        store
            .open(
                uri(path),
                text,
                language_id,
                1,
                &GrammarRegistry::with_defaults(),
                CacheOptions::default(),
            )
            .unwrap();
    }

    #[test]
    fn open_and_close() {
        let store = DocumentStore::new();
        open(&store, "main.rs", "fn main() {}", "rust");
        assert!(store.contains(&uri("main.rs")));
        assert_eq!(store.len(), 1);

        assert!(store.close(&uri("main.rs")));
        assert!(!store.close(&uri("main.rs")));
        assert!(store.is_empty());
    }

    #[test]
    fn untracked_document_has_no_answer() {
        let store = DocumentStore::new();
        let answer = store.with_document(&uri("missing.rs"), |doc| doc.version);
        assert!(answer.is_none());
    }

    #[test]
    fn document_without_grammar_is_not_tracked() {
        let store = DocumentStore::new();
        open(&store, "notes", "just words", "no-such-language");

        assert!(store.is_empty());
        assert!(!store.contains(&uri("notes")));
        assert!(store.is_open(&uri("notes")));
        assert!(store.with_document(&uri("notes"), |doc| doc.version).is_none());

        assert!(!store.close(&uri("notes")));
        assert!(!store.is_open(&uri("notes")));
    }

    #[test]
    fn reopen_refreshes_text() {
        let store = DocumentStore::new();
        open(&store, "main.rs", "fn main() {}", "rust");
        store
            .open(
                uri("main.rs"),
                "// replaced",
                "rust",
                7,
                &GrammarRegistry::with_defaults(),
                CacheOptions::default(),
            )
            .unwrap();

        store.with_document(&uri("main.rs"), |doc| {
            assert_eq!(doc.version, 7);
            assert_eq!(doc.buffer().text(), "// replaced");
            let info = doc.scope_at(Position::new(0, 5)).unwrap();
            assert!(info.scopes.iter().any(|s| s.starts_with("comment.line")));
        });
    }

    #[test]
    fn edits_update_text_and_scopes() {
        let store = DocumentStore::new();
        open(&store, "main.rs", "let a = 1;\nlet b = 2;", "rust");

        store.with_document(&uri("main.rs"), |doc| {
            doc.on_edits(vec![Edit::insert(Position::new(0, 0), "/* ")]).unwrap();
            assert_eq!(doc.buffer().text(), "/* let a = 1;\nlet b = 2;");
            let info = doc.scope_at(Position::new(1, 1)).unwrap();
            assert!(info.scopes.iter().any(|s| s.starts_with("comment.block")));
        });
    }

    #[test]
    fn reload_tracks_documents_that_gain_a_grammar() {
        let store = DocumentStore::new();
        open(&store, "main.rs", "fn main() {}", "rust");
        open(&store, "notes", "// one", "notes-lang");
        assert_eq!(store.len(), 1);

        // Untracked documents still follow edits.
        store
            .with_open_document(&uri("notes"), |doc| {
                let at = lsp_types::Position::new(0, 6);
                doc.apply_content_change(Some(lsp_types::Range::new(at, at)), " two".into())
            })
            .unwrap()
            .unwrap();

        let languages = HashMap::from([("notes-lang".to_string(), "source.rust".to_string())]);
        let registry = GrammarRegistry::with_defaults().with_languages(languages);
        assert_eq!(store.reload(&registry, CacheOptions::default()), 0);
        assert_eq!(store.len(), 2);

        let info = store
            .with_document(&uri("notes"), |doc| {
                assert_eq!(doc.buffer().text(), "// one two");
                doc.scope_at(Position::new(0, 8)).unwrap()
            })
            .unwrap();
        assert!(info.scopes.iter().any(|s| s.starts_with("comment.line")));

        // Without the override the grammar no longer resolves.
        let failures = store.reload(&GrammarRegistry::with_defaults(), CacheOptions::default());
        assert_eq!(failures, 0);
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&uri("notes")));
        assert!(store.is_open(&uri("notes")));
        store.with_document(&uri("main.rs"), |doc| {
            assert!(doc.cache().grammar().is_some());
        });
    }

    #[test]
    fn lsp_changes_use_utf16_columns() {
        let grammar = GrammarRegistry::with_defaults().resolve("rust", "/project/main.rs");
        let text = "let s = \"é…\";\nlet t = 1;";
        let mut doc =
            DocumentController::new(text, "rust", 1, grammar, CacheOptions::default()).unwrap();
        let range = |start: (u32, u32), end: (u32, u32)| {
            Some(lsp_types::Range::new(
                lsp_types::Position::new(start.0, start.1),
                lsp_types::Position::new(end.0, end.1),
            ))
        };

        // Each change is relative to the text left by the previous one.
        doc.apply_content_change(range((0, 9), (0, 11)), "ü".into()).unwrap();
        doc.apply_content_change(range((0, 12), (0, 12)), " // ☃".into()).unwrap();
        doc.apply_content_change(range((1, 0), (1, 0)), "/* ".into()).unwrap();
        assert_eq!(doc.buffer().text(), "let s = \"ü\"; // ☃\n/* let t = 1;");

        let info = doc.scope_at(Position::new(0, 9)).unwrap();
        assert!(info.scopes.iter().any(|s| s.starts_with("string.quoted")));

        let snowman = doc.buffer().position_from_lsp(lsp_types::Position::new(0, 16));
        assert_eq!(snowman, Position::new(0, 17));
        let info = doc.scope_at(snowman).unwrap();
        assert!(info.scopes.iter().any(|s| s.starts_with("comment.line")));

        let info = doc.scope_at(Position::new(1, 5)).unwrap();
        assert!(info.scopes.iter().any(|s| s.starts_with("comment.block")));

        doc.apply_content_change(None, "fn f() {}".into()).unwrap();
        assert_eq!(doc.buffer().text(), "fn f() {}");
        assert_eq!(doc.cache().len(), 1);
    }
}
