//! Hover showing the TextMate scopes under the cursor.

use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind};

use crate::document::{TextBuffer, TokenInfo};

/// Format a token's scope stack as markdown, innermost scope first.
fn format_scopes(token: &TokenInfo) -> String {
    let mut doc = String::new();
    if !token.text.trim().is_empty() {
        doc.push_str(&format!("**Token** `{}`\n\n", token.text));
    }
    doc.push_str("Scopes (innermost first):\n");
    for scope in token.scopes.iter().rev() {
        doc.push_str(&format!("- `{}`\n", scope));
    }
    doc
}

/// Build a hover for the token under the cursor.
///
/// Returns None when there is no token (no grammar, skipped or empty line).
pub fn hover_for_token(buffer: &TextBuffer, token: &TokenInfo) -> Option<Hover> {
    if token.scopes.is_empty() {
        return None;
    }

    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: format_scopes(token),
        }),
        range: Some(buffer.range_to_lsp(token.range)),
    })
}
