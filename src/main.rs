use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use iec104_gateway::adapters::AdapterContext;
use iec104_gateway::{GatewayConfig, MappingTable, PointStore, Server};

#[derive(Parser, Debug)]
#[clap(author, version, about = "IEC 61850 / Modbus to IEC 60870-5-104 gateway", long_about = None)]
struct Args {
    /// Path to a YAML config file. Missing fields fall back to GatewayConfig::default().
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Path to a CSV mapping table (protocol,channel_id,ioa,common_address,asdu_type,factor,offset,description).
    #[clap(short, long, value_parser)]
    mapping: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let mapping = Arc::new(load_mapping(args.mapping.as_deref()));

    info!(
        bind = %config.bind_addr_string(),
        max_connections = config.max_connections,
        "starting iec104-gateway"
    );

    let store = PointStore::new(config.clone());
    let server = Server::new(store.clone(), config);

    if let Err(e) = server.activate().await {
        error!(error = %e, "104 server activation failed");
        std::process::exit(1);
    }

    // Field-side adapters would be wired here, each holding an
    // `AdapterContext` built from the shared mapping table and store, and
    // driving it from whatever upstream 61850/Modbus client library
    // delivers samples. None is bundled -- see `adapters::iec61850` and
    // `adapters::modbus` for the ingress contract a real driver calls into.
    let _adapter_ctx = AdapterContext::new(mapping, store.clone());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    server.deactivate().await;
    store.shutdown().await;
    info!("iec104-gateway stopped");
}

fn load_config(path: Option<&std::path::Path>) -> Result<GatewayConfig, String> {
    let Some(path) = path else {
        return Ok(GatewayConfig::default());
    };
    let data = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    GatewayConfig::from_yaml_str(&data).map_err(|e| format!("{}: {e}", path.display()))
}

fn load_mapping(path: Option<&std::path::Path>) -> MappingTable {
    let Some(path) = path else {
        return MappingTable::new();
    };
    match std::fs::read_to_string(path) {
        Ok(data) => MappingTable::from_csv_str(&data),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read mapping file, starting with an empty table");
            MappingTable::new()
        }
    }
}
