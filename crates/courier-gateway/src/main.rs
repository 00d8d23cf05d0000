use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use courier_channels::Registry;
use courier_core::CourierConfig;

mod app;
mod factory;
mod handler;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_gateway=info,courier_channels=info,courier_socket=info,\
                 courier_webhook=info,courier_longpoll=info,courier_rpc=info,tower_http=info"
                    .into()
            }),
        )
        .init();

    // config: first argument > COURIER_CONFIG env > ~/.courier/courier.toml
    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref());

    let registry = Arc::new(Registry::new(Arc::new(handler::LogHandler)));
    let state_dir = Path::new(&config.state.dir);
    let mut webhooks = Vec::new();

    for entry in config.adapters.iter().filter(|e| e.enabled) {
        let built = match factory::build(entry, state_dir) {
            Ok(built) => built,
            Err(e) => {
                error!(adapter = %entry.id, error = %e, "failed to build adapter, skipping");
                continue;
            }
        };
        if let Err(e) = registry.register(built.adapter) {
            error!(adapter = %entry.id, error = %e, "failed to register adapter");
            continue;
        }
        if let Some(routes) = built.routes {
            webhooks.push((entry.id.clone(), routes));
        }
    }
    info!(adapters = registry.all().len(), "adapters registered");

    let state = Arc::new(app::AppState::new(Arc::clone(&registry)));
    let router = app::build_router(state, webhooks);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Courier gateway listening on {}", addr);

    registry.start_all().await;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down adapters");
    registry.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Load config, falling back to defaults (no adapters) when it fails to load or validate.
fn load_config(path: Option<&str>) -> CourierConfig {
    CourierConfig::load(path).unwrap_or_else(|e| {
        warn!(code = e.code(), error = %e, "config load failed, using defaults");
        CourierConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(b"[[adapters]]\nid = \"a\"\nkind = \"socket\"\nchannel_type = \"discord\"\n[[adapters]]\nid = \"a\"\nkind = \"socket\"\nchannel_type = \"discord\"\n")
            .unwrap();

        let config = load_config(file.path().to_str());

        assert!(config.adapters.is_empty());
        assert_eq!(config.gateway.port, courier_core::config::DEFAULT_PORT);
    }
}
