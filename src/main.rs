use tmscopes::create_service;
use tower_lsp::Server;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("TMSCOPES_LOG")
        .or_else(|_| EnvFilter::try_new("tmscopes=info"))
        .unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = create_service();
    Server::new(stdin, stdout, socket).serve(service).await;
}
