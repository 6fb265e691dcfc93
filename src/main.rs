use std::path::Path;
use std::sync::Arc;

use chatflow::config::AppConfig;
use chatflow::debounce::DebounceQueue;
use chatflow::flow::FlowExecutor;
use chatflow::llm::OpenRouterClient;
use chatflow::pipeline::MessageProcessor;
use chatflow::provider::ProviderRegistry;
use chatflow::server;
use chatflow::store::{Database, LibSqlBackend};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env();
    eprintln!("💬 Chatflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhooks: http://0.0.0.0:{}/webhook/:id", config.port);
    eprintln!("   Debounce window: {:?}\n", config.debounce_window);

    // ── Database ────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(Path::new(&config.db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );

    // ── Flow engine ─────────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::new());
    let completions = Arc::new(OpenRouterClient::default());
    let executor = FlowExecutor::new(db.clone(), providers, completions, &config);
    let processor = Arc::new(MessageProcessor::new(db.clone(), executor));

    // ── Debounce queue + webhook server ─────────────────────────────
    let queue = DebounceQueue::new(config.debounce_window, processor);
    let app = server::webhook_routes(db, queue);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "Webhook server started");
    axum::serve(listener, app).await?;

    Ok(())
}
