//! Incremental TextMate scope tracking, served over LSP.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService};
use tracing::{info, warn};

pub mod document;
pub mod grammar;
mod lsp;
pub(crate) mod settings;

pub use document::{
    CacheOptions, CachedLine, Document, DocumentController, DocumentStore, Edit, LineCache,
    TextBuffer, TokenInfo,
};
pub use grammar::{Grammar, GrammarError, GrammarRegistry, LineTokens, SyntectGrammar, Token};
pub use lsp::{
    hover_for_token, scope_info, ScopeAtParams, ScopeInfo, RELOAD_GRAMMARS_COMMAND,
    SCOPE_AT_METHOD,
};
pub use settings::{build_registry, discover_settings, load_settings, Settings};

/// Grammars and cache options shared by every document.
struct ServerConfig {
    registry: GrammarRegistry,
    options: CacheOptions,
}

impl ServerConfig {
    fn load(root: Option<&PathBuf>) -> Self {
        match root {
            Some(root) => {
                let (settings, settings_dir) = settings::discover_settings(root);
                Self {
                    registry: settings::build_registry(&settings, &settings_dir),
                    options: settings.cache_options(),
                }
            }
            None => Self {
                registry: GrammarRegistry::with_defaults(),
                options: CacheOptions::default(),
            },
        }
    }
}

pub struct Backend {
    client: Client,
    documents: DocumentStore,
    workspace_root: OnceLock<PathBuf>,
    config: RwLock<Arc<ServerConfig>>,
}

impl Backend {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            documents: DocumentStore::new(),
            workspace_root: OnceLock::new(),
            config: RwLock::new(Arc::new(ServerConfig::load(None))),
        }
    }

    async fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&*self.config.read().await)
    }

    /// Report a tokenization failure without failing the request.
    async fn report_grammar_error(&self, uri: &Url, err: &GrammarError) {
        warn!(%uri, error = %err, "tokenization failed");
        self.client
            .log_message(
                MessageType::ERROR,
                format!("tmscopes: tokenization failed for {uri}: {err}"),
            )
            .await;
    }

    /// Look up the token under an LSP position and render it while the
    /// document is locked. None for untracked documents or grammar failures.
    async fn query<R>(
        &self,
        uri: &Url,
        position: Position,
        render: impl FnOnce(&TextBuffer, &TokenInfo) -> R,
    ) -> Option<R> {
        let result = self.documents.with_document(uri, |doc| {
            let position = doc.buffer().position_from_lsp(position);
            doc.scope_at(position)
                .map(|token| render(doc.buffer(), &token))
        })?;

        match result {
            Ok(rendered) => Some(rendered),
            Err(err) => {
                self.report_grammar_error(uri, &err).await;
                None
            }
        }
    }

    /// Handle `textmate/scopeAt`.
    pub async fn scope_at(&self, params: ScopeAtParams) -> Result<Option<ScopeInfo>> {
        Ok(self
            .query(&params.text_document.uri, params.position, lsp::scope_info)
            .await)
    }

    /// Rebuild grammars from settings and re-tokenize every open document.
    async fn reload_grammars(&self) {
        let config = Arc::new(ServerConfig::load(self.workspace_root.get()));
        let failures = self.documents.reload(&config.registry, config.options);
        info!(
            grammars = config.registry.len(),
            documents = self.documents.len(),
            failures,
            "reloaded grammars"
        );
        *self.config.write().await = config;

        self.client
            .log_message(
                MessageType::INFO,
                format!(
                    "tmscopes: reloaded grammars for {} document(s)",
                    self.documents.len()
                ),
            )
            .await;
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        // Extract workspace root from params
        let workspace_root = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .and_then(|f| f.uri.to_file_path().ok())
            .or_else(|| {
                #[allow(deprecated)]
                params.root_uri.as_ref()?.to_file_path().ok()
            });

        if let Some(root) = workspace_root {
            let _ = self.workspace_root.set(root);
        }
        let config = ServerConfig::load(self.workspace_root.get());
        info!(grammars = config.registry.len(), "grammar registry ready");
        *self.config.write().await = Arc::new(config);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: vec![RELOAD_GRAMMARS_COMMAND.to_string()],
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "TextMate scope server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        let config = self.config().await;
        if let Err(err) = self.documents.open(
            doc.uri.clone(),
            &doc.text,
            &doc.language_id,
            doc.version,
            &config.registry,
            config.options,
        ) {
            self.report_grammar_error(&doc.uri, &err).await;
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // Changes arrive in order, each relative to the text left by the
        // previous one, so every change is its own batch.
        let failure = self.documents.with_open_document(&uri, |doc| {
            let mut failure = None;
            for change in params.content_changes {
                if let Err(err) = doc.apply_content_change(change.range, change.text) {
                    failure.get_or_insert(err);
                }
            }
            doc.version = version;
            failure
        });

        match failure {
            Some(Some(err)) => self.report_grammar_error(&uri, &err).await,
            Some(None) => {}
            None => warn!(%uri, "change for a document that is not open"),
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.documents.close(&params.text_document.uri);
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        Ok(self
            .query(uri, position, lsp::hover_for_token)
            .await
            .flatten())
    }

    async fn execute_command(
        &self,
        params: ExecuteCommandParams,
    ) -> Result<Option<serde_json::Value>> {
        if params.command != RELOAD_GRAMMARS_COMMAND {
            return Err(Error::invalid_params(format!(
                "unknown command: {}",
                params.command
            )));
        }
        self.reload_grammars().await;
        Ok(None)
    }
}

pub fn create_service() -> (LspService<Backend>, tower_lsp::ClientSocket) {
    LspService::build(Backend::new)
        .custom_method(SCOPE_AT_METHOD, Backend::scope_at)
        .finish()
}
