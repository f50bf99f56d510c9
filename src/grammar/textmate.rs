//! TextMate-style grammar engine backed by syntect.

use std::sync::Arc;

use syntect::parsing::{ParseState, Scope, ScopeStack, SyntaxReference, SyntaxSet};

use super::{Grammar, GrammarError, LineTokens, Token};

/// Rule stack for [`SyntectGrammar`].
///
/// Both halves are needed to continue on the next line: the parse state knows
/// which contexts are active, the scope stack knows which scopes are still
/// open at the end of the line.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntectState {
    parse: ParseState,
    scopes: ScopeStack,
}

/// A single syntax from a shared syntax set.
#[derive(Debug, Clone)]
pub struct SyntectGrammar {
    syntax_set: Arc<SyntaxSet>,
    /// Index into `syntax_set.syntaxes()`.
    index: usize,
}

impl SyntectGrammar {
    /// Look up a grammar by its root scope name (e.g. `source.rust`).
    ///
    /// When several syntaxes share a scope, the last one loaded wins.
    pub fn from_scope(syntax_set: Arc<SyntaxSet>, scope_name: &str) -> Option<Self> {
        let scope = Scope::new(scope_name).ok()?;
        let index = syntax_set
            .syntaxes()
            .iter()
            .rposition(|syntax| syntax.scope == scope)?;
        Some(Self { syntax_set, index })
    }

    /// Wrap a syntax that belongs to `syntax_set`.
    pub(super) fn from_reference(
        syntax_set: Arc<SyntaxSet>,
        syntax: &SyntaxReference,
    ) -> Option<Self> {
        let index = syntax_set
            .syntaxes()
            .iter()
            .position(|candidate| std::ptr::eq(candidate, syntax))?;
        Some(Self { syntax_set, index })
    }

    fn syntax(&self) -> &SyntaxReference {
        &self.syntax_set.syntaxes()[self.index]
    }

    /// Human-readable syntax name (e.g. `Rust`).
    pub fn name(&self) -> &str {
        &self.syntax().name
    }

    /// Root scope name (e.g. `source.rust`).
    pub fn scope_name(&self) -> String {
        self.syntax().scope.build_string()
    }

    fn initial_state(&self) -> SyntectState {
        SyntectState {
            parse: ParseState::new(self.syntax()),
            scopes: ScopeStack::new(),
        }
    }
}

impl Grammar for SyntectGrammar {
    type State = SyntectState;

    fn tokenize_line(
        &self,
        text: &str,
        prior: Option<&SyntectState>,
    ) -> Result<LineTokens<SyntectState>, GrammarError> {
        let mut state = prior.cloned().unwrap_or_else(|| self.initial_state());

        // Bundled syntaxes are compiled for lines that keep their terminator.
        let line = format!("{text}\n");
        let ops = state
            .parse
            .parse_line(&line, &self.syntax_set)
            .map_err(|err| GrammarError::Tokenize(err.to_string()))?;

        let mut tokens = Vec::new();
        let mut start = 0;
        for (offset, op) in ops {
            let offset = offset.min(text.len());
            if offset > start {
                tokens.push(Token::new(start, offset, scope_names(&state.scopes)));
                start = offset;
            }
            state
                .scopes
                .apply(&op)
                .map_err(|err| GrammarError::ScopeStack(format!("{err:?}")))?;
        }
        if start < text.len() || tokens.is_empty() {
            tokens.push(Token::new(start, text.len(), scope_names(&state.scopes)));
        }

        Ok(LineTokens {
            tokens,
            rule_stack: state,
        })
    }
}

fn scope_names(stack: &ScopeStack) -> Vec<String> {
    stack
        .as_slice()
        .iter()
        .map(|scope| scope.build_string())
        .collect()
}
