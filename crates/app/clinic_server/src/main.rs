//! Clinic session API server binary.
//!
//! Runs on PostgreSQL when a database URL is configured, otherwise on
//! in-memory stores (optionally seeding a bootstrap admin account).

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use clinic_api::{AppState, config::ApiConfig};
use clinic_core::audit::{AuditSink, PgAuditSink, TracingAuditSink};
use clinic_core::auth::password::hash_password;
use clinic_core::mail::LogMailer;
use clinic_core::session::Sweeper;
use clinic_core::store::Stores;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "clinic_server", about = "Clinic session API server")]
struct Args {
    /// Address to listen on. Overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// PostgreSQL connection URL. In-memory stores are used when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// E-mail of an admin account created at startup (in-memory stores only).
    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    bootstrap_admin_email: Option<String>,

    /// Password for the bootstrap admin account.
    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    bootstrap_admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,clinic_api=debug,clinic_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if args.database_url.is_some() {
        config.database_url = args.database_url;
    }

    let (stores, audit, pool): (Stores, Arc<dyn AuditSink>, _) = match &config.database_url {
        Some(url) => {
            info!(max_connections = args.max_connections, "connecting to PostgreSQL");
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(std::time::Duration::from_secs(30))
                .connect(url)
                .await?;

            info!("running database migrations");
            clinic_api::migrate(&pool).await?;

            (
                Stores::postgres(pool.clone()),
                Arc::new(PgAuditSink::new(pool.clone())),
                Some(pool),
            )
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory stores");
            let stores = Stores::memory();
            if let (Some(email), Some(password)) =
                (&args.bootstrap_admin_email, &args.bootstrap_admin_password)
            {
                let hash = hash_password(password)?;
                stores
                    .users
                    .create_user(email, Some("Administrator"), &hash, &["admin"])
                    .await?;
                info!(email = %email, "bootstrap admin created");
            }
            (stores, Arc::new(TracingAuditSink), None)
        }
    };

    let mailer = Arc::new(LogMailer::new(config.reset_url_base.clone()));
    let sweep = config.auth.sweep.clone();
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, stores, audit, mailer, pool);

    let cancel = CancellationToken::new();
    let sweepers = Sweeper::new(state.auth.clone(), state.limiter.clone(), sweep)
        .spawn(cancel.clone());

    let app = clinic_api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            cancel.cancel();
        }
    })
    .await?;

    cancel.cancel();
    for handle in sweepers {
        let _ = handle.await;
    }
    Ok(())
}
