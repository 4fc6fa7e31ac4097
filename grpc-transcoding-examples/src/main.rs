//! Runs a transcoding gateway in front of a gRPC server.
//!
//! ```text
//! gateway <descriptor-set> [backend-uri] [listen-addr] [config.json]
//! ```
//!
//! The descriptor set is produced with
//! `protoc --include_imports --descriptor_set_out=descriptor.bin ...`.
//! Arguments fall back to `GATEWAY_DESCRIPTORS`, `GATEWAY_BACKEND`,
//! `GATEWAY_LISTEN` and `GATEWAY_CONFIG`.

use std::env;

use anyhow::Context;
use grpc_transcoding_axum::prelude::*;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

fn arg_or_env(args: &[String], index: usize, key: &str) -> Option<String> {
    args.get(index).cloned().or_else(|| env::var(key).ok())
}

fn load_config(path: Option<String>) -> anyhow::Result<TranscodingConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_slice(&raw).with_context(|| format!("parsing {path}"))
        }
        None => Ok(TranscodingConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,grpc_transcoding_axum=debug")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let descriptors = arg_or_env(&args, 0, "GATEWAY_DESCRIPTORS")
        .context("usage: gateway <descriptor-set> [backend-uri] [listen-addr] [config.json]")?;
    let backend = arg_or_env(&args, 1, "GATEWAY_BACKEND")
        .unwrap_or_else(|| "http://127.0.0.1:50051".to_string());
    let listen =
        arg_or_env(&args, 2, "GATEWAY_LISTEN").unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let config = load_config(arg_or_env(&args, 3, "GATEWAY_CONFIG"))?;

    let bytes = std::fs::read(&descriptors).with_context(|| format!("reading {descriptors}"))?;
    let registry = ServiceRegistry::from_file_descriptor_set(&bytes)?;
    let channel = GrpcChannel::connect_lazy(backend.clone())?;

    let gateway = TranscodingGateway::builder(registry, channel)
        .config(config)
        .build();

    for route in gateway.routes().routes() {
        for binding in route.bindings() {
            tracing::info!(
                method = route.method().full_name(),
                "{} {}",
                binding.method(),
                binding.template()
            );
        }
    }

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(gateway.router::<()>())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!("transcoding {} on http://{}", backend, listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if !gateway.shutdown().await {
        tracing::warn!("calls were still running when the shutdown timeout expired");
    }
    Ok(())
}
