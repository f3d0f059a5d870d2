//! Registration Service - Entry point.

use anyhow::{bail, Context, Result};
use registration_core::{
    Collaborators, ContactVerifier, DocumentStore, MemoryArchive, MessagingGateway,
    RecordingGateway, RegistrationArchive, VerifierConfig,
};
use registration_service::{
    api::{create_router_with_rate_limit, AppState, RateLimitState},
    config::Config,
    EncryptedArchive, HttpMatcher, SessionRegistry, SignalGateway,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.log.level);

    if let Err(e) = run(config).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting Registration Service");

    let gateway = build_gateway(&config).await?;
    let verifier = ContactVerifier::new(
        gateway,
        VerifierConfig {
            code_ttl: config.verification.code_ttl,
            max_attempts: config.verification.max_attempts,
        },
    );

    let matcher = HttpMatcher::new(&config.matcher.url, config.matcher.timeout)
        .context("Failed to create biometric matcher client")?;
    info!(url = %config.matcher.url, timeout = ?config.matcher.timeout, "Biometric matcher configured");

    let archive = build_archive(&config)?;

    let collaborators = Collaborators {
        verifier: verifier.clone(),
        documents: DocumentStore::new(config.documents.max_image_bytes),
        matcher: Arc::new(matcher),
        archive,
    };

    // Background hygiene
    let _reaper = verifier.spawn_reaper(
        config.verification.reaper_interval,
        config.verification.retention,
    );
    let sessions = SessionRegistry::new(config.sessions.idle_ttl);
    let _cleanup = sessions.spawn_cleanup(config.sessions.cleanup_interval);

    let state = AppState::new(sessions, collaborators);
    let rate_limit = RateLimitState::new(
        config.rate_limit.global_per_minute,
        config.rate_limit.per_registration_per_minute,
    );
    let _pruning = rate_limit.spawn_pruning(config.sessions.cleanup_interval);
    let app = create_router_with_rate_limit(state, rate_limit);

    let addr = SocketAddr::new(
        config
            .server
            .listen_addr
            .parse()
            .unwrap_or([0, 0, 0, 0].into()),
        config.server.port,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    Ok(())
}

async fn build_gateway(config: &Config) -> Result<Arc<dyn MessagingGateway>> {
    if !config.signal.enabled {
        warn!("Signal delivery disabled, verification codes are recorded in memory only");
        return Ok(Arc::new(RecordingGateway::new()));
    }

    let sender = match &config.signal.sender_number {
        Some(sender) => sender.clone(),
        None => bail!("SIGNAL__SENDER_NUMBER is required when Signal delivery is enabled"),
    };

    let gateway = SignalGateway::new(&config.signal.api_url, sender)
        .context("Failed to create Signal client")?;

    if gateway.health_check().await {
        info!(api_url = %config.signal.api_url, "Signal API reachable");
    } else {
        warn!(api_url = %config.signal.api_url, "Signal API not reachable yet, code delivery will fail until it is");
    }

    Ok(Arc::new(gateway))
}

fn build_archive(config: &Config) -> Result<Arc<dyn RegistrationArchive>> {
    if !config.archive.persist {
        info!("Persistence disabled, submitted registrations are kept in memory");
        return Ok(Arc::new(MemoryArchive::new()));
    }

    let secret = match &config.archive.secret {
        Some(secret) => secret,
        None => bail!("ARCHIVE__SECRET is required when persistence is enabled"),
    };

    let archive = EncryptedArchive::new(&config.archive.path, secret);
    info!(path = ?archive.directory(), "Using encrypted archive");
    Ok(Arc::new(archive))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
