use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cloudops::config::Config;
use cloudops::credentials::vault::{VaultClient, VaultProviderFactory};
use cloudops::git::GitManifestResolver;
use cloudops::state::AppState;
use cloudops::workflow::{ArgoWorkflows, WorkflowCatalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("CLOUDOPS_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load()?;
    tracing::info!(config = ?cfg, "configuration loaded");

    if !cfg.ssh_pem_file.is_file() {
        anyhow::bail!("SSH_PEM_FILE {} does not exist", cfg.ssh_pem_file.display());
    }

    let catalog = WorkflowCatalog::load(&cfg.catalog_path)?;
    tracing::info!(
        frameworks = catalog.frameworks.len(),
        template = %catalog.workflow_template,
        "workflow catalog loaded"
    );

    // Per-call deadlines are set on each request; streaming calls have none.
    let http = reqwest::Client::builder()
        .connect_timeout(cfg.request_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let vault = VaultClient::new(http.clone(), cfg.vault_addr.clone(), cfg.request_timeout);
    let credentials = VaultProviderFactory::new(vault, cfg.vault_role.clone(), cfg.vault_secret.clone());
    let workflows = ArgoWorkflows::new(
        http.clone(),
        cfg.argo_addr.clone(),
        cfg.argo_namespace.clone(),
        cfg.request_timeout,
    );
    let manifests = GitManifestResolver::new(
        cfg.repo_cache_path.clone(),
        Some(cfg.ssh_pem_file.clone()),
        cfg.request_timeout,
    );

    let addr: SocketAddr = cfg
        .listen
        .parse()
        .with_context(|| format!("invalid CLOUDOPS_LISTEN '{}'", cfg.listen))?;

    let state = AppState {
        credentials: Arc::new(credentials),
        workflows: Arc::new(workflows),
        manifests: Arc::new(manifests),
        catalog: Arc::new(catalog),
        http,
        config: Arc::new(cfg),
    };

    let app = cloudops::app(state);

    tracing::info!(%addr, "starting cloudops");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("cloudops stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
