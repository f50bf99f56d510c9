//! Per-line tokenization cache with incremental edit propagation.
//!
//! Line `i` is only valid if it was tokenized with the rule stack of line
//! `i - 1`. After an edit the cache re-tokenizes the edited lines and compares
//! the grammar state at the edit boundary before and after: an unchanged state
//! and an unchanged line count mean nothing below the edit can differ, so the
//! update stops there. Otherwise it re-tokenizes through the end of the
//! document.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::grammar::{Grammar, GrammarError, LineTokens, Token};

use super::text::{Document, Edit, Position, Range};

/// Lines longer than this many bytes are not tokenized by default.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 20_000;

/// Tunables for a [`LineCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Lines longer than this (in bytes) are recorded as skipped.
    pub max_line_length: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Cached result for one line.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedLine<S> {
    Tokenized(LineTokens<S>),
    /// Deliberately not tokenized (over-length line).
    Skipped,
}

impl<S> CachedLine<S> {
    /// Rule stack at the end of the line, if it was tokenized.
    pub fn rule_stack(&self) -> Option<&S> {
        match self {
            CachedLine::Tokenized(line) => Some(&line.rule_stack),
            CachedLine::Skipped => None,
        }
    }

    pub fn tokens(&self) -> &[Token] {
        match self {
            CachedLine::Tokenized(line) => &line.tokens,
            CachedLine::Skipped => &[],
        }
    }
}

/// The token covering a queried position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Span of the token on its line.
    pub range: Range,
    /// Document text covered by `range`.
    pub text: String,
    /// Scope names from the root scope inwards.
    pub scopes: Vec<String>,
}

impl TokenInfo {
    /// The "no token" answer: empty range at `position`, no text, no scopes.
    pub fn empty(position: Position) -> Self {
        Self {
            range: Range::empty(position),
            text: String::new(),
            scopes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.text.is_empty()
    }
}

/// Grammar state at the end of a line, as seen by the stability check.
#[derive(Debug)]
enum Boundary<S> {
    /// Never tokenized.
    Unknown,
    Skipped,
    State(S),
}

impl<S: PartialEq> Boundary<S> {
    /// `Unknown` is unequal to everything, including itself.
    fn is_stable(&self, after: &Self) -> bool {
        match (self, after) {
            (Boundary::State(before), Boundary::State(after)) => before == after,
            (Boundary::Skipped, Boundary::Skipped) => true,
            _ => false,
        }
    }
}

/// Tokenization state for one document.
///
/// The cache does not own the document; every operation takes the current
/// [`Document`] so the caller decides how text is stored.
#[derive(Debug)]
pub struct LineCache<G: Grammar> {
    grammar: Option<Arc<G>>,
    options: CacheOptions,
    /// Dense prefix of the document; index = line number.
    lines: Vec<CachedLine<G::State>>,
    /// Text each cached line had when it was tokenized.
    snapshots: Vec<String>,
    /// Grammar invocations since construction.
    tokenized: usize,
}

impl<G: Grammar> LineCache<G> {
    /// Build a cache and tokenize the whole document.
    ///
    /// With no grammar the cache stays empty and every query answers with an
    /// empty [`TokenInfo`].
    pub fn new<D: Document + ?Sized>(
        document: &D,
        grammar: Option<Arc<G>>,
        options: CacheOptions,
    ) -> Result<Self, GrammarError> {
        let mut cache = Self::untokenized(grammar, options);
        cache.refresh(document)?;
        Ok(cache)
    }

    /// A cache with nothing tokenized yet. Queries fill it in line by line.
    pub fn untokenized(grammar: Option<Arc<G>>, options: CacheOptions) -> Self {
        Self {
            grammar,
            options,
            lines: Vec::new(),
            snapshots: Vec::new(),
            tokenized: 0,
        }
    }

    pub fn grammar(&self) -> Option<&Arc<G>> {
        self.grammar.as_ref()
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    /// Number of cached lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, line: usize) -> Option<&CachedLine<G::State>> {
        self.lines.get(line)
    }

    /// Total number of lines handed to the grammar so far.
    pub fn tokenized_lines(&self) -> usize {
        self.tokenized
    }

    /// Drop everything and tokenize the whole document again.
    pub fn refresh<D: Document + ?Sized>(&mut self, document: &D) -> Result<(), GrammarError> {
        self.lines.clear();
        self.snapshots.clear();
        let last = document.line_count().saturating_sub(1);
        self.reparse_range(document, Range::lines(0, last))
    }

    /// Re-tokenize every line of `range` in increasing order.
    ///
    /// The range is clamped to the document. If it starts past the cached
    /// prefix, the missing lines in between are tokenized first.
    pub fn reparse_range<D: Document + ?Sized>(
        &mut self,
        document: &D,
        range: Range,
    ) -> Result<(), GrammarError> {
        if self.grammar.is_none() {
            return Ok(());
        }
        let range = document.validate_range(range);
        let first = range.start.line.min(self.lines.len());
        for line in first..=range.end.line {
            self.reparse_line(document, line)?;
        }
        Ok(())
    }

    fn reparse_line<D: Document + ?Sized>(
        &mut self,
        document: &D,
        line: usize,
    ) -> Result<(), GrammarError> {
        let Some(grammar) = self.grammar.as_deref() else {
            return Ok(());
        };
        let text = document.line_text(line);

        let entry = if text.len() > self.options.max_line_length {
            trace!(line, len = text.len(), "skipping over-length line");
            CachedLine::Skipped
        } else {
            let prior = line
                .checked_sub(1)
                .and_then(|previous| self.lines.get(previous))
                .and_then(CachedLine::rule_stack);
            let tokens = grammar.tokenize_line(text, prior)?;
            self.tokenized += 1;
            CachedLine::Tokenized(tokens)
        };

        debug_assert!(line <= self.lines.len(), "line cache must stay dense");
        if line < self.lines.len() {
            self.lines[line] = entry;
            self.snapshots[line] = text.to_string();
        } else {
            self.lines.push(entry);
            self.snapshots.push(text.to_string());
        }
        Ok(())
    }

    /// Bring the cache up to date after `edits` were applied to `document`.
    ///
    /// Edit ranges are in pre-edit coordinates and must be sorted by
    /// descending start position. Each edit re-tokenizes only its own lines
    /// unless it changed the line count or the rule stack at its end line, in
    /// which case everything from the lowest remaining edit to the end of the
    /// document is re-tokenized and the batch is done.
    pub fn apply_changes<D: Document + ?Sized>(
        &mut self,
        document: &D,
        edits: &[Edit],
    ) -> Result<(), GrammarError> {
        if self.grammar.is_none() {
            return Ok(());
        }
        debug_assert!(
            edits
                .windows(2)
                .all(|pair| pair[0].range.start >= pair[1].range.start),
            "edits must be sorted by descending start position"
        );

        for (index, edit) in edits.iter().enumerate() {
            let start_line = edit.range.start.line;
            let end_line = edit.range.end.line;
            let inserted = edit.inserted_line_breaks();
            let removed = edit.removed_line_breaks();

            let init_state = self.boundary(end_line);
            self.reparse_range(document, Range::lines(start_line, start_line + inserted))?;
            let last_state = self.boundary(end_line);

            if inserted == removed && init_state.is_stable(&last_state) {
                continue;
            }

            // Later edits in the batch start above this one; widening from
            // the lowest of them covers their lines as well.
            let after_edit = start_line + inserted + 1;
            let from = edits[index + 1..]
                .iter()
                .map(|edit| edit.range.start.line)
                .fold(after_edit, usize::min);
            let line_count = document.line_count();
            debug!(
                from,
                inserted,
                removed,
                line_count,
                "edit not contained, re-tokenizing to end"
            );
            if from < line_count {
                self.reparse_range(document, Range::lines(from, line_count - 1))?;
            }
            self.lines.truncate(line_count);
            self.snapshots.truncate(line_count);
            return Ok(());
        }
        Ok(())
    }

    fn boundary(&self, line: usize) -> Boundary<G::State> {
        match self.lines.get(line) {
            None => Boundary::Unknown,
            Some(CachedLine::Skipped) => Boundary::Skipped,
            Some(CachedLine::Tokenized(tokens)) => Boundary::State(tokens.rule_stack.clone()),
        }
    }

    /// The token covering `position`.
    ///
    /// If the line's text no longer matches what was tokenized (the document
    /// changed without an edit notification), that line is re-tokenized first.
    pub fn scope_at<D: Document + ?Sized>(
        &mut self,
        document: &D,
        position: Position,
    ) -> Result<TokenInfo, GrammarError> {
        if self.grammar.is_none() {
            return Ok(TokenInfo::empty(position));
        }
        let position = document.validate_position(position);
        let line = position.line;
        let text = document.line_text(line);

        if self.snapshots.get(line).map(String::as_str) != Some(text) {
            debug!(line, "stale line, re-tokenizing before query");
            self.reparse_range(document, Range::lines(line, line))?;
        }

        let token = self
            .lines
            .get(line)
            .map(CachedLine::tokens)
            .unwrap_or_default()
            .iter()
            .rev()
            .find(|token| token.start <= position.character);
        let Some(token) = token else {
            return Ok(TokenInfo::empty(position));
        };

        let end = token.end.min(text.len());
        let start = token.start.min(end);
        Ok(TokenInfo {
            range: Range::new(Position::new(line, start), Position::new(line, end)),
            text: text.get(start..end).unwrap_or_default().to_string(),
            scopes: token.scopes.clone(),
        })
    }
}
