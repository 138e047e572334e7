use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use notehive_api::AppStateInner;
use notehive_api::config::Config;
use notehive_api::mailer::{HttpMailer, Mailer, TracingMailer};
use notehive_api::oauth::{GoogleOAuth, OAuthProvider};
use notehive_db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "notehive_server=debug,notehive_api=debug,notehive_db=info,tower_http=debug".into()
            }),
        )
        .init();

    // Config
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Database::open(&config.db_path)?;

    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(mail) => Arc::new(HttpMailer::new(mail.clone())),
        None => {
            warn!("MAIL_API_URL/MAIL_API_KEY not set; reset codes will only be logged (development)");
            Arc::new(TracingMailer)
        }
    };

    let oauth: Option<Arc<dyn OAuthProvider>> = match &config.google {
        Some(google) => Some(Arc::new(GoogleOAuth::new(google)?)),
        None => {
            info!("Google sign-in disabled (GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set)");
            None
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let environment = config.environment;

    let state = AppStateInner::new(db, config, mailer, oauth);
    let app = notehive_api::router(state);

    info!("NoteHive server listening on {} ({:?})", addr, environment);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
