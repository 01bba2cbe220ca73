//! Proxy orchestration and lifecycle management.
//!
//! This module coordinates the various components (policy store, prompter,
//! decision broker, proxy server, host settings) to run the proxy until the
//! user stops it.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigLoader};
use crate::host::HostSettings;
use crate::prompt::{CommandPrompter, Prompter, TerminalPrompter};
use crate::proxy::{DecisionBroker, PolicyStore, ProxyConfig, ProxyServer};
use crate::telemetry::{AuditEvent, AuditLogger};

/// How long runtime shutdown waits for blocking work such as a pending
/// terminal read.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run the proxy until Ctrl-C or SIGTERM.
pub fn run_proxy(config: &Config, config_loader: &ConfigLoader) -> Result<()> {
    // Build tokio runtime for proxy
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = rt.block_on(serve(config, config_loader));

    // A terminal prompt may still be blocked on stdin.
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn serve(config: &Config, config_loader: &ConfigLoader) -> Result<()> {
    let started = Instant::now();
    let listen = config
        .proxy
        .listen_addr()
        .context("Invalid listen address")?;
    let product_name = config.proxy.product_name().to_string();

    let audit = Arc::new(AuditLogger::new().unwrap_or_else(|e| {
        warn!("Audit logging disabled: {}", e);
        AuditLogger::new_null()
    }));

    let policy_file = config_loader
        .policy_file(config)
        .context("Failed to locate policy file")?;
    info!("Using policy file {:?}", policy_file.path());
    let store = Arc::new(PolicyStore::load(Arc::new(policy_file)));

    let prompter = build_prompter(config);
    let broker = Arc::new(DecisionBroker::new(
        store.clone(),
        prompter,
        config.proxy.prompt_timeout(),
        audit.clone(),
    ));

    // Setup shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy_config = ProxyConfig {
        listen,
        product_name: product_name.clone(),
        drain_timeout: config.proxy.drain_timeout(),
    };
    let server = ProxyServer::bind(
        proxy_config,
        store.clone(),
        broker.clone(),
        audit.clone(),
        shutdown_rx,
    )
    .await
    .with_context(|| format!("Failed to listen on {}", listen))?;
    let local_addr = server.local_addr();

    let host_settings = config.host.settings_file.as_ref().map(HostSettings::new);
    if let Some(ref settings) = host_settings
        && let Err(e) = settings.apply(local_addr)
    {
        warn!("Failed to update host settings: {}", e);
    }

    audit.log(AuditEvent::SessionStart {
        user: whoami(),
        pid: std::process::id(),
        listen: local_addr.to_string(),
    });
    info!("Audit session {}", audit.session());
    eprintln!("{} listening on http://{}", product_name, local_addr);

    // Start the proxy server in the background
    let mut proxy_handle = tokio::spawn(server.run());

    tokio::select! {
        result = wait_for_signal() => {
            result?;
            info!("Shutdown requested");
        }
        result = &mut proxy_handle => {
            // The server only returns on its own if it failed.
            match result {
                Ok(Err(e)) => error!("Proxy server error: {}", e),
                Err(e) => error!("Proxy server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    let _ = shutdown_tx.send(true);

    // Closes the broker: requests still arriving on open connections get 503.
    let abandoned = broker.abandon_all();
    if abandoned > 0 {
        info!("Dropped {} pending decision(s)", abandoned);
    }

    if !proxy_handle.is_finished() {
        match proxy_handle.await {
            Ok(Err(e)) => error!("Proxy server error: {}", e),
            Err(e) => error!("Proxy server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    let late = broker.abandon_all();
    if late > 0 {
        warn!("Dropped {} decision(s) opened during drain", late);
    }

    store.flush().await;
    debug!("Policy flushed");

    if let Some(ref settings) = host_settings
        && let Err(e) = settings.clear()
    {
        warn!("Failed to restore host settings: {}", e);
    }

    audit.log(AuditEvent::SessionEnd {
        user: whoami(),
        duration_sec: started.elapsed().as_secs(),
        allowed: store.allowed_count(),
        denied: store.denied_count(),
    });
    info!(
        "Stopped after {}s ({} allowed, {} blocked)",
        started.elapsed().as_secs(),
        store.allowed_count(),
        store.denied_count()
    );

    Ok(())
}

/// Command prompter when one is configured, terminal otherwise.
fn build_prompter(config: &Config) -> Arc<dyn Prompter> {
    let product_name = config.proxy.product_name();
    match CommandPrompter::new(product_name, &config.prompt.command) {
        Some(prompter) => {
            debug!("Prompting with {:?}", config.prompt.command);
            Arc::new(prompter)
        }
        None => {
            debug!("Prompting on the terminal");
            Arc::new(TerminalPrompter::new(product_name))
        }
    }
}

/// Wait for Ctrl-C or SIGTERM.
async fn wait_for_signal() -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

/// Get the current username for audit logging.
fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
