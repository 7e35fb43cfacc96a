//! Demo service on the chassis: an echo route plus an identity probe.
//!
//! Configuration comes from the `GANTRY_*` environment; the flags
//! below override the most common knobs for local runs:
//!
//! ```text
//! APP_KEY_DEMO=qwerty cargo run --bin echo-server -- --port 8080
//! curl -H 'Authorization: Bearer qwerty' localhost:8080/whoami
//! ```

use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::Value;

use gantry_server::{current_consumer, logging, Microservice, MicroserviceConfig};

#[derive(Parser, Debug)]
#[command(name = "echo-server", about = "Demo service on the gantry chassis")]
struct Args {
    /// Listening port (overrides GANTRY_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Bind address (overrides GANTRY_ADDRESS).
    #[arg(long)]
    address: Option<String>,
}

async fn echo(body: String) -> String {
    body
}

async fn whoami() -> Json<Value> {
    let consumer = current_consumer().ok().flatten();
    Json(consumer.map_or(Value::Null, |consumer| {
        serde_json::to_value(&consumer).unwrap_or(Value::Null)
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = MicroserviceConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.address.is_some() {
        config.address = args.address;
    }

    let routes = Router::new()
        .route("/echo", post(echo))
        .route("/whoami", get(whoami));

    let mut service = Microservice::with_routes(config, routes);
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    service.stop().await?;
    Ok(())
}
