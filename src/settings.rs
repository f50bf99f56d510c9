//! Settings infrastructure for the scope server.
//!
//! This module loads and discovers `tmscopes.toml` files that configure the
//! tokenizer limits, extra grammar folders, and language id overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::document::{CacheOptions, DEFAULT_MAX_LINE_LENGTH};
use crate::grammar::GrammarRegistry;

/// Name of the settings file searched for in the workspace.
pub const SETTINGS_FILE: &str = "tmscopes.toml";

/// Root settings structure loaded from tmscopes.toml.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Tokenizer limits.
    pub tokenizer: Option<TokenizerSettings>,

    /// Extra grammar sources.
    pub grammars: Option<GrammarSettings>,

    /// Language id -> root scope name (e.g. `mylang = "source.mylang"`).
    pub languages: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenizerSettings {
    /// Lines longer than this many bytes are not tokenized.
    pub max_line_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GrammarSettings {
    /// Folders containing `.sublime-syntax` files.
    /// Relative paths are resolved against the settings directory.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

impl Settings {
    /// Cache options derived from the `[tokenizer]` table.
    pub fn cache_options(&self) -> CacheOptions {
        let max_line_length = self
            .tokenizer
            .as_ref()
            .and_then(|t| t.max_line_length)
            .unwrap_or(DEFAULT_MAX_LINE_LENGTH);
        CacheOptions { max_line_length }
    }
}

/// Load settings from a tmscopes.toml file.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse settings");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

/// Discover tmscopes.toml by searching up the directory tree, then direct children.
///
/// Search order:
/// 1. Walk up from `start_dir` to filesystem root
/// 2. If not found, check immediate child directories of `start_dir`
///
/// Returns `(settings, settings_dir)` where `settings_dir` is the directory
/// containing the found file (used for resolving relative paths).
/// If not found, returns `(Settings::default(), start_dir)`.
pub fn discover_settings(start_dir: &Path) -> (Settings, PathBuf) {
    // Phase 1: Walk up from start_dir
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            return (load_settings(&candidate), dir.to_path_buf());
        }
        current = dir.parent();
    }

    // Phase 2: Check immediate child directories
    if let Ok(entries) = std::fs::read_dir(start_dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                let candidate = entry.path().join(SETTINGS_FILE);
                if candidate.is_file() {
                    return (load_settings(&candidate), entry.path());
                }
            }
        }
    }

    (Settings::default(), start_dir.to_path_buf())
}

/// Build the grammar registry described by `settings`.
///
/// Missing grammar folders are skipped with a warning. If the remaining
/// folders fail to load, only the bundled grammars are used.
pub fn build_registry(settings: &Settings, settings_dir: &Path) -> GrammarRegistry {
    let languages = settings.languages.clone().unwrap_or_default();

    let folders: Vec<PathBuf> = settings
        .grammars
        .iter()
        .flat_map(|g| g.paths.iter())
        .map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                settings_dir.join(path)
            }
        })
        .filter(|path| {
            let exists = path.is_dir();
            if !exists {
                warn!(path = %path.display(), "grammar folder not found");
            }
            exists
        })
        .collect();

    match GrammarRegistry::load(&folders, languages.clone()) {
        Ok(registry) => registry,
        Err(e) => {
            warn!(error = %e, "falling back to bundled grammars");
            GrammarRegistry::with_defaults().with_languages(languages)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_settings() {
        let settings: Settings = toml::from_str(
            r#"
[tokenizer]
max_line_length = 120

[grammars]
paths = ["syntaxes", "/opt/grammars"]

[languages]
mylang = "source.python"
"#,
        )
        .unwrap();

        assert_eq!(settings.cache_options().max_line_length, 120);
        assert_eq!(
            settings.grammars.unwrap().paths,
            vec![PathBuf::from("syntaxes"), PathBuf::from("/opt/grammars")]
        );
        assert_eq!(
            settings.languages.unwrap().get("mylang").unwrap(),
            "source.python"
        );
    }

    #[test]
    fn empty_settings_use_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.cache_options(), CacheOptions::default());
        assert!(settings.grammars.is_none());
    }

    #[test]
    fn grammars_table_without_paths() {
        let settings: Settings = toml::from_str("[grammars]\n").unwrap();
        assert!(settings.grammars.unwrap().paths.is_empty());
    }

    #[test]
    fn build_registry_applies_language_overrides() {
        let settings: Settings = toml::from_str(
            r#"
[languages]
mylang = "source.python"
"#,
        )
        .unwrap();
        let registry = build_registry(&settings, Path::new("/nonexistent"));
        let grammar = registry.resolve("mylang", "/x/file").unwrap();
        assert_eq!(grammar.scope_name(), "source.python");
    }

    #[test]
    fn build_registry_skips_missing_folders() {
        let settings: Settings = toml::from_str(
            r#"
[grammars]
paths = ["does-not-exist"]
"#,
        )
        .unwrap();
        let registry = build_registry(&settings, Path::new("/nonexistent"));
        assert!(registry.resolve("rust", "/x/main.rs").is_some());
    }

    /// Create a unique temp directory for test isolation.
    fn make_test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("tmscopes-test")
            .join(name)
            .join(format!("{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Clean up a test directory.
    fn cleanup_test_dir(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn load_settings_invalid_toml_falls_back() {
        let dir = make_test_dir("load-invalid");
        let path = dir.join(SETTINGS_FILE);
        std::fs::write(&path, "[tokenizer\nmax_line_length = ").unwrap();

        let settings = load_settings(&path);
        assert!(settings.tokenizer.is_none());

        cleanup_test_dir(&dir);
    }

    #[test]
    fn discover_settings_in_current_dir() {
        let dir = make_test_dir("discover-current");
        std::fs::write(
            dir.join(SETTINGS_FILE),
            "[tokenizer]\nmax_line_length = 42\n",
        )
        .unwrap();

        let (settings, settings_dir) = discover_settings(&dir);
        assert_eq!(settings_dir, dir);
        assert_eq!(settings.cache_options().max_line_length, 42);

        cleanup_test_dir(&dir);
    }

    #[test]
    fn discover_settings_in_parent_dir() {
        let parent = make_test_dir("discover-parent");
        let child = parent.join("subdir");
        std::fs::create_dir_all(&child).unwrap();
        std::fs::write(
            parent.join(SETTINGS_FILE),
            "[languages]\nfoo = \"source.rust\"\n",
        )
        .unwrap();

        let (settings, settings_dir) = discover_settings(&child);
        assert_eq!(settings_dir, parent);
        let languages = settings.languages.unwrap();
        assert_eq!(languages.get("foo").unwrap(), "source.rust");

        cleanup_test_dir(&parent);
    }

    #[test]
    fn discover_settings_in_child_dir() {
        let parent = make_test_dir("discover-child");
        let child = parent.join("config");
        std::fs::create_dir_all(&child).unwrap();
        std::fs::write(child.join(SETTINGS_FILE), "[grammars]\npaths = [\"syntaxes\"]\n")
            .unwrap();

        let (settings, settings_dir) = discover_settings(&parent);
        assert_eq!(settings_dir, child);
        assert_eq!(
            settings.grammars.unwrap().paths,
            vec![PathBuf::from("syntaxes")]
        );

        cleanup_test_dir(&parent);
    }

    #[test]
    fn discover_settings_not_found() {
        let dir = make_test_dir("discover-none");

        let (settings, settings_dir) = discover_settings(&dir);
        assert_eq!(settings_dir, dir);
        assert!(settings.tokenizer.is_none());

        cleanup_test_dir(&dir);
    }

    #[test]
    fn discover_settings_parent_preferred_over_child() {
        let parent = make_test_dir("discover-priority");
        let child = parent.join("nested");
        std::fs::create_dir_all(&child).unwrap();

        std::fs::write(
            parent.join(SETTINGS_FILE),
            "[tokenizer]\nmax_line_length = 1\n",
        )
        .unwrap();
        std::fs::write(
            child.join(SETTINGS_FILE),
            "[tokenizer]\nmax_line_length = 2\n",
        )
        .unwrap();

        // Starting from parent finds parent's settings (phase 1) before children
        let (settings, settings_dir) = discover_settings(&parent);
        assert_eq!(settings_dir, parent);
        assert_eq!(settings.cache_options().max_line_length, 1);

        cleanup_test_dir(&parent);
    }
}
