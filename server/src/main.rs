use std::sync::Arc;

use tokio::net::TcpListener;

use relay_server::auth::jwt::load_or_generate_jwt_secret;
use relay_server::config::{generate_config_template, Config};
use relay_server::db::{self, store::SqliteStore};
use relay_server::routes::build_router;
use relay_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Chat relay v{} starting", env!("CARGO_PKG_VERSION"));

    if config.api_key.is_empty() {
        tracing::warn!("api_key is empty: history, token check and chat will reject every client");
    }
    if config.auth_token.is_empty() {
        tracing::warn!("auth_token is empty: identity issuance will reject every request");
    }

    let db = db::init_db(&config.data_dir)?;
    let jwt_secret = load_or_generate_jwt_secret(&config.data_dir)?;

    let state = AppState::new(Arc::new(SqliteStore::new(db)), jwt_secret, config.settings());
    let app = build_router(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
