use clap::Parser;
use snowcatalog::db;
use snowcatalog::server::config::ServerConfig;
use snowcatalog::translator::llm::OpenAiChatModel;
use snowcatalog::version::VERSION;
use snowcatalog::warehouse::snowflake::SnowflakeConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Quiet the ORM and query logs unless RUST_LOG says otherwise.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
        return;
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Manually check for --version before full parsing to keep the simple output.
    if std::env::args().any(|arg| arg == "--version") {
        println!("Server version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    // --- Server Config Setup ---
    let server_config = Arc::new(ServerConfig::load(args.config.as_deref())?);

    init_logging(&server_config.log_dir);
    info!("Starting server, version: {}", VERSION);

    // --- Database Setup ---
    let db_pool = db::connect(&server_config.database_url).await?;
    db::create_tables(&db_pool).await?;

    // --- Warehouse and Language Model ---
    let connector = Arc::new(SnowflakeConnector::new(
        server_config.warehouse_login_timeout(),
        server_config.warehouse_query_timeout(),
    )?);
    if server_config.llm_api_key.is_none() {
        warn!("LLM_API_KEY is not set; natural-language queries will fail.");
    }
    let language_model = Arc::new(OpenAiChatModel::new(server_config.chat_model_settings())?);

    // --- Axum HTTP Server Setup ---
    let app = snowcatalog::web::create_axum_router(
        db_pool,
        connector,
        language_model,
        server_config.clone(),
    );

    let addr: SocketAddr = server_config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(Box::new)?;

    info!("Server stopped.");
    Ok(())
}
