use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use tessera::{
    application::{Services, session::HeaderSession},
    cache::{SystemClock, build_read_through},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
    upstream::{RetryPolicy, UpstreamClient},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_startup_error(&error);
        process::exit(1);
    }
}

fn report_startup_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "tessera stopped");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "tessera stopped");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), InfraError> {
    let services = build_services(&settings)?;
    let purge_handle = spawn_memory_purge(&services);

    let result = serve_http(&settings, HttpState::new(services)).await;

    purge_handle.abort();
    let _ = purge_handle.await;

    result
}

fn build_services(settings: &config::Settings) -> Result<Services, InfraError> {
    let cache_config = settings.cache_config();
    let cache = build_read_through(&cache_config, Arc::new(SystemClock));

    let upstream = UpstreamClient::new(
        &settings.upstream.base_url,
        settings.upstream.timeout,
        RetryPolicy::new(
            settings.upstream.max_retries.get(),
            settings.upstream.retry_delay,
        ),
    )?;

    let session = Arc::new(HeaderSession::new(settings.session.cookie_name.clone()));

    info!(
        upstream = %settings.upstream.base_url,
        distributed_cache = cache_config.redis_settings().effective_url().is_some(),
        key_prefix = cache_config.key_prefix.as_deref().unwrap_or(""),
        "cache services configured"
    );

    Ok(Services::new(&cache_config, cache, upstream, session))
}

/// The in-process tier only drops expired entries lazily on read; sweep the rest.
fn spawn_memory_purge(services: &Services) -> JoinHandle<()> {
    let local = services.cache.store().local().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_PURGE_INTERVAL);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = local.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = local.len(), "memory cache purged");
            }
        }
    })
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), InfraError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(addr = %settings.server.addr, "tessera listening");

    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(true);
        },
    );

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            let _ = stopping_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_seconds = grace.as_secs(), "graceful shutdown timed out; dropping open connections");
        }
    }

    info!("tessera stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
