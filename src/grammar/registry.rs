//! Language id to grammar resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use syntect::parsing::{SyntaxReference, SyntaxSet};
use thiserror::Error;
use tracing::info;

use super::SyntectGrammar;

/// Failure while building a [`GrammarRegistry`].
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to load grammars from {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: syntect::LoadingError,
    },
}

/// The set of known grammars plus language id overrides.
#[derive(Debug, Clone)]
pub struct GrammarRegistry {
    syntax_set: Arc<SyntaxSet>,
    /// Language id -> root scope name.
    languages: HashMap<String, String>,
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl GrammarRegistry {
    /// Registry with syntect's bundled syntaxes only.
    pub fn with_defaults() -> Self {
        Self {
            syntax_set: Arc::new(SyntaxSet::load_defaults_newlines()),
            languages: HashMap::new(),
        }
    }

    /// Registry with the bundled syntaxes plus every `.sublime-syntax` found
    /// under `folders`.
    pub fn load(
        folders: &[PathBuf],
        languages: HashMap<String, String>,
    ) -> Result<Self, RegistryError> {
        let mut builder = SyntaxSet::load_defaults_newlines().into_builder();
        for folder in folders {
            builder
                .add_from_folder(folder, true)
                .map_err(|source| RegistryError::Load {
                    path: folder.clone(),
                    source,
                })?;
        }
        let syntax_set = builder.build();
        info!(
            grammars = syntax_set.syntaxes().len(),
            folders = folders.len(),
            "loaded grammar registry"
        );

        Ok(Self {
            syntax_set: Arc::new(syntax_set),
            languages,
        })
    }

    /// Replace the language id overrides.
    pub fn with_languages(mut self, languages: HashMap<String, String>) -> Self {
        self.languages = languages;
        self
    }

    /// Number of grammars available.
    pub fn len(&self) -> usize {
        self.syntax_set.syntaxes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the grammar for a document.
    ///
    /// Lookup order: configured language override, syntax name or extension
    /// token matching `language_id`, then the extension of `path`.
    pub fn resolve(&self, language_id: &str, path: &str) -> Option<Arc<SyntectGrammar>> {
        let configured = self
            .languages
            .get(language_id)
            .and_then(|scope_name| self.grammar_for_scope(scope_name));
        if configured.is_some() {
            return configured;
        }

        let syntax = self
            .syntax_set
            .find_syntax_by_token(language_id)
            .or_else(|| {
                let extension = Path::new(path).extension()?.to_str()?;
                self.syntax_set.find_syntax_by_extension(extension)
            })?;
        self.wrap(syntax)
    }

    /// Resolve a grammar by root scope name.
    pub fn grammar_for_scope(&self, scope_name: &str) -> Option<Arc<SyntectGrammar>> {
        SyntectGrammar::from_scope(Arc::clone(&self.syntax_set), scope_name).map(Arc::new)
    }

    fn wrap(&self, syntax: &SyntaxReference) -> Option<Arc<SyntectGrammar>> {
        SyntectGrammar::from_reference(Arc::clone(&self.syntax_set), syntax).map(Arc::new)
    }
}
