//! Line-oriented text storage and position utilities.
//!
//! Positions inside the crate are zero-based lines and byte columns into the
//! line's UTF-8 text, the unit grammar engines report. LSP positions use
//! UTF-16 columns and are converted at the boundary.

use std::cmp::Ordering;

use tower_lsp::lsp_types;

/// A line/column position. `character` is a byte offset into the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line
            .cmp(&other.line)
            .then(self.character.cmp(&other.character))
    }
}

/// A half-open span between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Empty range at `position`.
    pub fn empty(position: Position) -> Self {
        Self::new(position, position)
    }

    /// Range spanning whole lines `first..=last`.
    pub fn lines(first: usize, last: usize) -> Self {
        Self::new(Position::new(first, 0), Position::new(last, usize::MAX))
    }
}

/// A replacement of `range` (pre-edit coordinates) with `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range,
    pub text: String,
}

impl Edit {
    pub fn new(range: Range, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    /// Pure insertion at `position`.
    pub fn insert(position: Position, text: impl Into<String>) -> Self {
        Self::new(Range::empty(position), text)
    }

    /// Number of line breaks (`\r\n`, `\n` or `\r`) in the replacement text.
    pub fn inserted_line_breaks(&self) -> usize {
        count_line_breaks(&self.text)
    }

    /// Number of line breaks in the replaced range.
    pub fn removed_line_breaks(&self) -> usize {
        self.range.end.line.saturating_sub(self.range.start.line)
    }
}

/// The document collaborator the line cache reads from.
pub trait Document {
    /// Number of lines; an empty document has one empty line.
    fn line_count(&self) -> usize;

    /// Text of `line` without its terminator. Empty for out-of-range lines.
    fn line_text(&self, line: usize) -> &str;

    /// Clamp a position to the document bounds.
    fn validate_position(&self, position: Position) -> Position;

    /// Clamp both ends of a range to the document bounds.
    fn validate_range(&self, range: Range) -> Range {
        let start = self.validate_position(range.start);
        let end = self.validate_position(range.end).max(start);
        Range::new(start, end)
    }
}

/// Count `\r\n`, `\n` and lone `\r` line breaks.
pub fn count_line_breaks(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                count += 1;
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => count += 1,
            _ => {}
        }
        i += 1;
    }
    count
}

/// Split text into lines, dropping `\r\n`, `\n` and `\r` terminators.
///
/// Always returns at least one line.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            '\n' => lines.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    lines.push(current);
    lines
}

/// An editable document stored as a vector of lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBuffer {
    lines: Vec<String>,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new("")
    }
}

impl TextBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            lines: split_lines(text),
        }
    }

    /// Full text joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Apply one edit. The range is clamped first.
    pub fn apply_edit(&mut self, edit: &Edit) {
        let range = self.validate_range(edit.range);
        let prefix = &self.lines[range.start.line][..range.start.character];
        let suffix = &self.lines[range.end.line][range.end.character..];

        let mut replacement = split_lines(&edit.text);
        if let Some(first) = replacement.first_mut() {
            first.insert_str(0, prefix);
        }
        if let Some(last) = replacement.last_mut() {
            last.push_str(suffix);
        }
        self.lines.splice(range.start.line..=range.end.line, replacement);
    }

    /// Apply a batch of non-overlapping edits expressed against the same
    /// pre-edit text. Edits are applied from the last position backwards so
    /// earlier coordinates stay valid.
    pub fn apply_edits(&mut self, edits: &[Edit]) {
        let mut ordered: Vec<&Edit> = edits.iter().collect();
        ordered.sort_by(|a, b| b.range.start.cmp(&a.range.start));
        for edit in ordered {
            self.apply_edit(edit);
        }
    }

    /// Convert an LSP position (UTF-16 column) to a byte position.
    ///
    /// Out-of-range positions are clamped.
    pub fn position_from_lsp(&self, position: lsp_types::Position) -> Position {
        let last = self.lines.len() - 1;
        if position.line as usize > last {
            return Position::new(last, self.lines[last].len());
        }
        let line = position.line as usize;
        let text = &self.lines[line];

        let mut utf16_col = 0u32;
        for (i, c) in text.char_indices() {
            if utf16_col >= position.character {
                return Position::new(line, i);
            }
            utf16_col += c.len_utf16() as u32;
        }
        Position::new(line, text.len())
    }

    /// Convert a byte position to an LSP position (UTF-16 column).
    pub fn position_to_lsp(&self, position: Position) -> lsp_types::Position {
        let position = self.validate_position(position);
        let text = &self.lines[position.line];
        let col: usize = text[..position.character]
            .chars()
            .map(char::len_utf16)
            .sum();
        lsp_types::Position::new(position.line as u32, col as u32)
    }

    pub fn range_from_lsp(&self, range: lsp_types::Range) -> Range {
        Range::new(
            self.position_from_lsp(range.start),
            self.position_from_lsp(range.end),
        )
    }

    pub fn range_to_lsp(&self, range: Range) -> lsp_types::Range {
        lsp_types::Range::new(
            self.position_to_lsp(range.start),
            self.position_to_lsp(range.end),
        )
    }
}

impl Document for TextBuffer {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_text(&self, line: usize) -> &str {
        self.lines.get(line).map(String::as_str).unwrap_or("")
    }

    fn validate_position(&self, position: Position) -> Position {
        let last = self.lines.len() - 1;
        if position.line > last {
            return Position::new(last, self.lines[last].len());
        }
        let text = &self.lines[position.line];
        let mut character = position.character.min(text.len());
        while !text.is_char_boundary(character) {
            character -= 1;
        }
        Position::new(position.line, character)
    }
}
