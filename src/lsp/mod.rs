//! LSP protocol feature implementations.
//!
//! This module provides implementations for LSP features:
//! - Hover listing the scope stack under the cursor
//! - The `textmate/scopeAt` custom request

mod hover;
mod scope;

pub use hover::hover_for_token;
pub use scope::{scope_info, ScopeAtParams, ScopeInfo, SCOPE_AT_METHOD};

/// `workspace/executeCommand` name that reloads grammars and settings.
pub const RELOAD_GRAMMARS_COMMAND: &str = "tmscopes.reloadGrammars";
