//! The `textmate/scopeAt` custom request.

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{Position, Range, TextDocumentIdentifier};

use crate::document::{TextBuffer, TokenInfo};

/// JSON-RPC method name of the scope query.
pub const SCOPE_AT_METHOD: &str = "textmate/scopeAt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeAtParams {
    pub text_document: TextDocumentIdentifier,
    /// Position with a UTF-16 column, as everywhere in LSP.
    pub position: Position,
}

/// Wire form of a [`TokenInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    pub range: Range,
    pub text: String,
    pub scopes: Vec<String>,
}

/// Convert a token to its wire form, translating byte columns to UTF-16.
pub fn scope_info(buffer: &TextBuffer, token: &TokenInfo) -> ScopeInfo {
    ScopeInfo {
        range: buffer.range_to_lsp(token.range),
        text: token.text.clone(),
        scopes: token.scopes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;

    #[test]
    fn params_use_camel_case() {
        let params: ScopeAtParams = serde_json::from_value(serde_json::json!({
            "textDocument": { "uri": "file:///a.rs" },
            "position": { "line": 2, "character": 4 }
        }))
        .unwrap();
        assert_eq!(params.text_document.uri.path(), "/a.rs");
        assert_eq!(params.position, Position::new(2, 4));
    }

    #[test]
    fn columns_are_utf16_on_the_wire() {
        // 'é' is 2 bytes in UTF-8 and 1 code unit in UTF-16.
        let buffer = TextBuffer::new("é foo");
        let token = TokenInfo {
            range: document::Range::new(
                document::Position::new(0, 3),
                document::Position::new(0, 6),
            ),
            text: "foo".to_string(),
            scopes: vec!["source.x".to_string()],
        };

        let info = scope_info(&buffer, &token);
        assert_eq!(info.range, Range::new(Position::new(0, 2), Position::new(0, 5)));
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            serde_json::json!({
                "range": {
                    "start": { "line": 0, "character": 2 },
                    "end": { "line": 0, "character": 5 }
                },
                "text": "foo",
                "scopes": ["source.x"]
            })
        );
    }
}
