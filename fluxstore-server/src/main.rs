// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use clap::Parser;
use fluxstore_proto::file_service_server::FileServiceServer;
use fluxstore_service::coordinator::{CoordinatorConfig, FileCoordinator};
use fluxstore_service::interceptor::ConcurrencyLayer;
use fluxstore_service::registry::LimiterRegistry;
use fluxstore_service::FluxstoreFileService;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Streaming file storage gRPC service")]
struct Args {
    /// Path to the JSON5 configuration file. Falls back to the
    /// CONFIG_PATH environment variable if unset.
    #[arg(long)]
    config_path: Option<String>,
}

fn config_path(args: Args) -> Result<String, fluxstore_error::Error> {
    args.config_path
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .ok_or_else(|| fluxstore_error::make_err!(fluxstore_error::Code::InvalidArgument, "no --config-path given and CONFIG_PATH is unset"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let path = config_path(args)?;
    let config = fluxstore_config::load_from_file(&path)?;

    let object_store = fluxstore_store::build_object_store(&config.object_store).await?;
    let meta_store = fluxstore_store::build_meta_store(&config.meta_store).await?;

    let registry = Arc::new(LimiterRegistry::new(
        config.limiter.bulk_capacity,
        config.limiter.list_capacity,
        config.limiter.idle_ttl,
        config.limiter.max_tracked_clients,
    ));

    let coordinator = Arc::new(FileCoordinator::new(object_store, meta_store, CoordinatorConfig::from(&config.coordinator)));
    let file_service = FluxstoreFileService::new(coordinator);

    let concurrency_layer = ConcurrencyLayer::new(registry.clone(), config.limiter.client_id_metadata_key.clone())
        .on_reject(|method, client_id, kind| {
            tracing::debug!(method, client_id, ?kind, "rejected: client at capacity");
        });

    let addr = config.server.listen_address.parse()?;
    tracing::info!(%addr, "starting fluxstore-server");

    let server = tonic::transport::Server::builder()
        .layer(concurrency_layer)
        .add_service(FileServiceServer::new(file_service))
        .serve_with_shutdown(addr, shutdown_signal());

    server.await?;

    registry.close();
    tracing::info!("fluxstore-server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("received shutdown signal");
}
