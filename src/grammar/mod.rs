//! Grammar engine interface.
//!
//! The line cache only talks to a grammar through [`Grammar`]: tokenize one
//! line of text given the rule stack left behind by the previous line. This
//! module provides:
//! - `Token` and `LineTokens`, the per-line result shape
//! - `SyntectGrammar`, a TextMate-style engine backed by syntect
//! - `GrammarRegistry` for resolving a language id to a grammar

mod registry;
mod textmate;

use std::fmt;

use thiserror::Error;

pub use registry::{GrammarRegistry, RegistryError};
pub use textmate::{SyntectGrammar, SyntectState};

/// A contiguous span of one line with a single scope stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte offset where the token starts in the line.
    pub start: usize,
    /// Byte offset where the token ends in the line (exclusive).
    pub end: usize,
    /// Scope names from the outermost (root) scope to the innermost.
    pub scopes: Vec<String>,
}

impl Token {
    pub fn new(start: usize, end: usize, scopes: Vec<String>) -> Self {
        Self { start, end, scopes }
    }
}

/// Tokenization result for a single line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineTokens<S> {
    /// Tokens ordered by start offset, contiguous over the line.
    pub tokens: Vec<Token>,
    /// Grammar state at the end of the line, fed to the next line.
    pub rule_stack: S,
}

/// Failure reported by a grammar engine while tokenizing a line.
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("failed to tokenize line: {0}")]
    Tokenize(String),

    #[error("unbalanced scope stack: {0}")]
    ScopeStack(String),
}

/// A line tokenizer with opaque carried state.
///
/// Implementations must be pure: the same `(text, prior)` pair always yields
/// the same tokens and the same resulting rule stack. `prior` is `None` for
/// the first line of a document or whenever the previous line's state is
/// unknown.
pub trait Grammar {
    /// The rule stack carried between lines. Compared only for equality.
    type State: Clone + PartialEq + fmt::Debug;

    fn tokenize_line(
        &self,
        text: &str,
        prior: Option<&Self::State>,
    ) -> Result<LineTokens<Self::State>, GrammarError>;
}
