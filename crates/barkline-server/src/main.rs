use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("barkline=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dirs(&config);

    let db = barkline_db::create_pool(&config.database.url, config.database.max_connections).await?;
    barkline_db::run_migrations(&db).await?;

    let state = barkline_core::AppState {
        db,
        event_bus: barkline_core::events::EventBus::default(),
        presence: Arc::new(barkline_core::presence::PresenceRegistry::new()),
        config: barkline_core::AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = barkline_api::build_router()
        .merge(barkline_ws::gateway_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;

    print_startup_banner(&config.server.bind_address, &config.database.url);

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        println!();
        tracing::info!("Shutting down (ctrl-c)...");
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Ensure the database parent directory exists before the pool opens it.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
    }
}

fn print_startup_banner(bind_address: &str, db_url: &str) {
    println!();
    println!("  Barkline");
    println!();
    println!("  Listening:   http://{}", bind_address);
    println!("  Gateway:     ws://{}/gateway", bind_address);
    println!("  Database:    {}", db_url);
    println!();
}
