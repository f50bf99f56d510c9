//! Document state management and tokenization caching.
//!
//! This module provides:
//! - `TextBuffer` and the `Document` trait for line-oriented text access
//! - `LineCache`, the incremental per-line tokenization cache
//! - `DocumentController` and `DocumentStore` for document lifecycle management

mod cache;
mod state;
mod text;

pub use cache::{CacheOptions, CachedLine, LineCache, TokenInfo, DEFAULT_MAX_LINE_LENGTH};
pub use state::{DocumentController, DocumentStore};
pub use text::{count_line_breaks, split_lines, Document, Edit, Position, Range, TextBuffer};
