use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use campus_portal::{
    built_info, config::LogFormat, routes, PortalConfig, PortalContext,
};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "info,campus_portal=debug,campus_db=info";

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(LogFormat::from_env());
    let config = PortalConfig::load().context("Falha ao carregar configuração")?;

    info!(
        version = built_info::PKG_VERSION,
        profile = built_info::PROFILE,
        rustc = built_info::RUSTC_VERSION,
        log_format = %config.log_format,
        "Iniciando portal do campus"
    );

    let ctx = Arc::new(
        PortalContext::init(&config)
            .await
            .context("Falha ao inicializar contexto do portal")?,
    );

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let app = routes::router(ctx.clone(), config.max_upload_bytes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(ConcurrencyLimitLayer::new(config.concurrency_limit));

    info!("Escutando em {}", config.bind_addr);
    axum::Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Falha no servidor HTTP")?;

    ctx.shutdown().await;
    info!("Portal encerrado");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Falha ao instalar handler de Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C recebido, encerrando");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("SIGTERM recebido, encerrando");
            }
            Err(e) => {
                tracing::error!("Falha ao instalar handler de SIGTERM: {}", e);
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
}
