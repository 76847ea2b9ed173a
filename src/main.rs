// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{routing::get, Router};
use dnsman::{
    constants::{
        DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_RETRY_PERIOD_SECS, ERROR_REQUEUE_DURATION_SECS,
        KIND_DNS_ENTRY, KIND_DNS_LOCK, KIND_DNS_OWNER, KIND_DNS_PROVIDER,
        METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH, METRICS_SERVER_PORT,
        TOKIO_WORKER_THREADS,
    },
    crd::{DNSEntry, DNSLock, DNSOwner, DNSProvider},
    lookup::SystemResolver,
    metrics,
    provider::AdapterFactory,
    reconcilers::{
        access::KubeAccess, reconcile_dnsentry, reconcile_dnslock, reconcile_dnsowner,
        reconcile_dnsprovider, Context,
    },
    state::{State, StateConfig},
};
use futures::StreamExt;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client,
};
use kube_lease_manager::{LeaseManager, LeaseManagerBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("dnsman-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set, otherwise defaults to INFO level.
/// Respects `RUST_LOG_FORMAT` environment variable for output format (json or text).
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting dnsman DNS controller");
}

/// Build the controller context: Kubernetes client, adapter factory,
/// resolver and the state engine wired to its trigger streams.
async fn initialize_services() -> Result<(
    Arc<Context>,
    futures::channel::mpsc::UnboundedReceiver<()>,
    futures::channel::mpsc::UnboundedReceiver<()>,
)> {
    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let factory = AdapterFactory::bundled();
    info!(types = ?factory.known_types(), "Registered provider adapter types");

    let resolver = Arc::new(SystemResolver::from_system_conf()?);
    let (access, entry_trigger, lock_trigger) = KubeAccess::new(client.clone());

    let config = StateConfig::for_factory(&factory);
    let state = State::new(config, access, factory, resolver.clone());

    Ok((
        Arc::new(Context {
            client,
            state,
            resolver,
        }),
        entry_trigger,
        lock_trigger,
    ))
}

/// Start the Prometheus metrics HTTP server
///
/// Serves metrics on the configured port and path (default: 0.0.0.0:8080/metrics)
fn start_metrics_server() -> tokio::task::JoinHandle<()> {
    info!(
        bind_address = METRICS_SERVER_BIND_ADDRESS,
        port = METRICS_SERVER_PORT,
        path = METRICS_SERVER_PATH,
        "Starting Prometheus metrics HTTP server"
    );

    tokio::spawn(async move {
        async fn metrics_handler() -> String {
            match metrics::gather_metrics() {
                Ok(metrics_text) => metrics_text,
                Err(e) => {
                    error!("Failed to gather metrics: {}", e);
                    String::from("# Error gathering metrics\n")
                }
            }
        }

        let app = Router::new().route(METRICS_SERVER_PATH, get(metrics_handler));

        let bind_addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{METRICS_SERVER_PORT}");
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {bind_addr}: {e}");
                return;
            }
        };

        info!("Metrics server listening on http://{bind_addr}{METRICS_SERVER_PATH}");

        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {e}");
        }
    })
}

/// Leader election configuration
struct LeaderElectionConfig {
    enabled: bool,
    lease_name: String,
    lease_namespace: String,
    identity: String,
    lease_duration: u64,
    retry_period: u64,
}

/// Load leader election configuration from environment variables
fn load_leader_election_config() -> LeaderElectionConfig {
    let enabled = std::env::var("DNSMAN_ENABLE_LEADER_ELECTION")
        .unwrap_or_else(|_| "true".to_string())
        .parse::<bool>()
        .unwrap_or(true);

    let lease_name =
        std::env::var("DNSMAN_LEASE_NAME").unwrap_or_else(|_| "dnsman-leader".to_string());

    let lease_namespace = std::env::var("DNSMAN_LEASE_NAMESPACE")
        .or_else(|_| std::env::var("POD_NAMESPACE"))
        .unwrap_or_else(|_| "dns-system".to_string());

    let lease_duration = std::env::var("DNSMAN_LEASE_DURATION_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_DURATION_SECS);

    let retry_period = std::env::var("DNSMAN_LEASE_RETRY_PERIOD_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_RETRY_PERIOD_SECS);

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("dnsman-{}", rand::random::<u32>()));

    LeaderElectionConfig {
        enabled,
        lease_name,
        lease_namespace,
        identity,
        lease_duration,
        retry_period,
    }
}

/// Create a default watcher configuration.
///
/// Used for controllers that need to watch all changes including status
/// updates.
#[inline]
fn default_watcher_config() -> Config {
    Config::default()
}

/// Create a semantic watcher configuration.
///
/// Only triggers on semantic changes (spec modifications), ignoring
/// status-only updates. This prevents reconciliation loops when controllers
/// update status fields.
#[inline]
fn semantic_watcher_config() -> Config {
    Config::default().any_semantic()
}

async fn async_main() -> Result<()> {
    initialize_logging();

    let (ctx, entry_trigger, lock_trigger) = initialize_services().await?;

    let _metrics_handle = start_metrics_server();

    let config = load_leader_election_config();

    if config.enabled {
        info!(
            lease_name = %config.lease_name,
            lease_namespace = %config.lease_namespace,
            identity = %config.identity,
            lease_duration_secs = config.lease_duration,
            "Leader election enabled"
        );
        info!("Starting leader election, waiting to acquire leadership...");

        let lease_manager = LeaseManagerBuilder::new(ctx.client.clone(), &config.lease_name)
            .with_namespace(&config.lease_namespace)
            .with_identity(&config.identity)
            .with_duration(config.lease_duration)
            .with_grace(config.retry_period)
            .build()
            .await?;

        let (leader_rx, lease_handle) = lease_manager.watch().await;

        let mut rx = leader_rx.clone();
        while !*rx.borrow_and_update() {
            rx.changed().await?;
        }

        info!("Leadership acquired, starting controllers");
        metrics::record_leader_elected(&config.identity);

        let result = run_controllers_with_leader_election(
            ctx,
            entry_trigger,
            lock_trigger,
            leader_rx,
            lease_handle,
        )
        .await;
        metrics::record_leader_lost(&config.identity);
        result?;
    } else {
        run_controllers_without_leader_election(ctx, entry_trigger, lock_trigger).await?;
    }

    Ok(())
}

/// Monitor leadership status - returns when leadership is lost or an error occurs
async fn monitor_leadership(
    mut leader_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    loop {
        leader_rx.changed().await?;
        if !*leader_rx.borrow() {
            // Leadership lost
            return Ok(());
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            result.map_err(anyhow::Error::from)
        }
        result = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                sigterm.recv().await;
                Ok::<(), anyhow::Error>(())
            }
            #[cfg(not(unix))]
            {
                // On non-Unix platforms, just wait forever
                std::future::pending::<()>().await;
                Ok::<(), anyhow::Error>(())
            }
        } => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            result
        }
    }
}

/// Run all controllers without leader election, with signal handling
async fn run_controllers_without_leader_election(
    ctx: Arc<Context>,
    entry_trigger: futures::channel::mpsc::UnboundedReceiver<()>,
    lock_trigger: futures::channel::mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    warn!("Leader election DISABLED - running without high availability");
    info!("Starting all controllers with signal handling");

    let shutdown_result: Result<()> = tokio::select! {
        result = shutdown_signal() => {
            info!("Stopping all controllers...");
            result
        }
        result = run_all_controllers(ctx, entry_trigger, lock_trigger) => {
            result
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully");
    Ok(())
}

/// Run controllers with leader election
///
/// If leadership is lost or SIGTERM/SIGINT is received, all controllers are
/// stopped and the process exits gracefully.
async fn run_controllers_with_leader_election(
    ctx: Arc<Context>,
    entry_trigger: futures::channel::mpsc::UnboundedReceiver<()>,
    lock_trigger: futures::channel::mpsc::UnboundedReceiver<()>,
    leader_rx: tokio::sync::watch::Receiver<bool>,
    _lease_handle: tokio::task::JoinHandle<
        Result<LeaseManager, kube_lease_manager::LeaseManagerError>,
    >,
) -> Result<()> {
    info!("Running controllers with leader election and signal handling");

    let shutdown_result: Result<()> = tokio::select! {
        result = shutdown_signal() => {
            info!("Stopping all controllers and releasing leader election lease...");
            result
        }
        result = monitor_leadership(leader_rx) => {
            match result {
                Ok(()) => {
                    warn!("Leadership lost! Stopping all controllers...");
                    anyhow::bail!("Leadership lost - stepping down")
                }
                Err(e) => {
                    error!("Leadership monitor error: {:?}", e);
                    anyhow::bail!("Leadership monitoring failed: {e}")
                }
            }
        }
        result = run_all_controllers(ctx, entry_trigger, lock_trigger) => {
            result
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully, leader election lease released");
    Ok(())
}

/// Run all controllers and the background lock refresh
async fn run_all_controllers(
    ctx: Arc<Context>,
    entry_trigger: futures::channel::mpsc::UnboundedReceiver<()>,
    lock_trigger: futures::channel::mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    tokio::select! {
        result = run_dnsprovider_controller(ctx.clone()) => {
            error!("CRITICAL: DNSProvider controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("DNSProvider controller exited unexpectedly without error")
        }
        result = run_dnsowner_controller(ctx.clone()) => {
            error!("CRITICAL: DNSOwner controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("DNSOwner controller exited unexpectedly without error")
        }
        result = run_dnsentry_controller(ctx.clone(), entry_trigger) => {
            error!("CRITICAL: DNSEntry controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("DNSEntry controller exited unexpectedly without error")
        }
        result = run_dnslock_controller(ctx.clone(), lock_trigger) => {
            error!("CRITICAL: DNSLock controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("DNSLock controller exited unexpectedly without error")
        }
        () = ctx.state.clone().run_lock_refresh() => {
            anyhow::bail!("Lock refresh task exited unexpectedly")
        }
    }
}

/// Run the `DNSEntry` controller
async fn run_dnsentry_controller(
    ctx: Arc<Context>,
    trigger: futures::channel::mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    info!("Starting DNSEntry controller");

    let api = Api::<DNSEntry>::all(ctx.client.clone());

    // Only watch for spec changes, not status updates, to avoid
    // reconciliation loops from our own status writes. Engine-initiated
    // re-triggers (duplicate promotion, provider changes) arrive through
    // the external trigger stream.
    Controller::new(api, semantic_watcher_config())
        .reconcile_all_on(trigger)
        .run(reconcile_dnsentry_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `DNSLock` controller
async fn run_dnslock_controller(
    ctx: Arc<Context>,
    trigger: futures::channel::mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    info!("Starting DNSLock controller");

    let api = Api::<DNSLock>::all(ctx.client.clone());

    Controller::new(api, semantic_watcher_config())
        .reconcile_all_on(trigger)
        .run(reconcile_dnslock_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `DNSProvider` controller
async fn run_dnsprovider_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting DNSProvider controller");

    let api = Api::<DNSProvider>::all(ctx.client.clone());

    Controller::new(api, default_watcher_config())
        .run(reconcile_dnsprovider_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `DNSOwner` controller
async fn run_dnsowner_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting DNSOwner controller");

    let api = Api::<DNSOwner>::all(ctx.client.clone());

    Controller::new(api, semantic_watcher_config())
        .run(reconcile_dnsowner_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `DNSEntry`
async fn reconcile_dnsentry_wrapper(
    entry: Arc<DNSEntry>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_dnsentry(ctx, entry).await {
        Ok(action) => {
            metrics::record_reconciliation_success(KIND_DNS_ENTRY, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile DNSEntry: {}", e);
            metrics::record_reconciliation_error(KIND_DNS_ENTRY, start.elapsed());
            metrics::record_error(KIND_DNS_ENTRY, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `DNSLock`
async fn reconcile_dnslock_wrapper(
    lock: Arc<DNSLock>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_dnslock(ctx, lock).await {
        Ok(action) => {
            metrics::record_reconciliation_success(KIND_DNS_LOCK, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile DNSLock: {}", e);
            metrics::record_reconciliation_error(KIND_DNS_LOCK, start.elapsed());
            metrics::record_error(KIND_DNS_LOCK, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `DNSProvider`
async fn reconcile_dnsprovider_wrapper(
    provider: Arc<DNSProvider>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_dnsprovider(ctx, provider).await {
        Ok(action) => {
            metrics::record_reconciliation_success(KIND_DNS_PROVIDER, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile DNSProvider: {}", e);
            metrics::record_reconciliation_error(KIND_DNS_PROVIDER, start.elapsed());
            metrics::record_error(KIND_DNS_PROVIDER, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `DNSOwner`
async fn reconcile_dnsowner_wrapper(
    owner: Arc<DNSOwner>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_dnsowner(ctx, owner).await {
        Ok(action) => {
            metrics::record_reconciliation_success(KIND_DNS_OWNER, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile DNSOwner: {}", e);
            metrics::record_reconciliation_error(KIND_DNS_OWNER, start.elapsed());
            metrics::record_error(KIND_DNS_OWNER, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Generic error policy for all controllers.
///
/// Requeues the resource after a fixed delay; the engine's own backoff
/// handles provider-level pacing.
fn error_policy<T>(_resource: Arc<T>, _err: &ReconcileError, _ctx: Arc<Context>) -> Action
where
    T: std::fmt::Debug,
{
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
