use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use flink::auth::{TokenIssuer, hash_password};
use flink::config::{Cli, Command, Config, default_config_dir, default_config_path};
use flink::db::{Database, UserStore};
use flink::handler::AppState;
use flink::routes::router;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // The database file lives next to the config file.
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("flink.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %flink::unpack_error(&e), "failed to setup database");
        std::process::exit(1);
    });

    if let Some(Command::AddUser { username }) = args.command {
        if let Err(e) = add_user(&db, &username).await {
            tracing::error!(error = ?e, username = %username, "failed to add user");
            std::process::exit(1);
        }
        return;
    }

    let tokens = TokenIssuer::new(cfg.auth.get_jwt_secret(), cfg.auth.get_token_ttl_hours())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "invalid auth settings");
            std::process::exit(1);
        });

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let db = Arc::new(db);
    let app = router(AppState::new(db.clone(), db, tokens));

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("flink.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server stopped unexpectedly");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        }
    }

    tracing::info!("flink.svc going off, graceful shutdown complete");
}

async fn add_user(db: &Database, username: &str) -> anyhow::Result<()> {
    let mut password = String::new();
    std::io::stdin()
        .read_line(&mut password)
        .context("reading password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        bail!("password is empty");
    }

    let hash = hash_password(password)?;
    db.create_user(username, &hash).await?;
    Ok(())
}
