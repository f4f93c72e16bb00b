// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage target service
//!
//! Serves copy/transform xactions over HTTP. A target:
//!
//! - Accepts list/range/prefix copy messages and runs them as xactions
//! - Registers transforms (push, redirect, reverse proxy, exec)
//! - Serves objects, raw or through a transform
//! - Exports Prometheus metrics

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use xcopy_target::config::{DEFAULT_BIND_ADDRESS, TargetConfig};
use xcopy_target::context::TargetNode;
use xcopy_target::{metrics, router};

const DEFAULT_LOG_FILTER: &str = "xcopy_target=info,etl_comm=info,xcopy_cluster=info";

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

fn print_help(program: &str) {
    print_version();
    println!("Usage: {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  -c, --config FILE  Read configuration from a JSON file");
    println!("  -h, --help         Display this information");
    println!("  -V, --version      Display the program's version number");
    println!();
    println!("Environment variables:");
    println!("  NODE_ID                 Node id in the cluster map (default: t1)");
    println!(
        "  BIND_ADDRESS            Server bind address (default: {})",
        DEFAULT_BIND_ADDRESS
    );
    println!("  DATA_DIR                Object store root (default: /var/tmp/xcopy)");
    println!("  CAPACITY_BYTES          Cap on stored bytes (default: unlimited)");
    println!("  XACT_IDLE_TIMEOUT_SECS  Idle xaction lifetime (default: 300)");
    println!("  ETL_TIMEOUT_SECS        Per-object transform timeout (default: none)");
    println!(
        "  RUST_LOG                Log filter (default: {})",
        DEFAULT_LOG_FILTER
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_file: Option<PathBuf> = None;
    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            "-h" | "--help" => {
                print_help(&args[0]);
                return Ok(());
            }
            "-c" | "--config" => match rest.next() {
                Some(path) => config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("{} requires a file argument", arg);
                    std::process::exit(1);
                }
            },
            _ => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        ))
        .init();

    print_version();
    metrics::register_metrics();

    let config = match &config_file {
        Some(path) => TargetConfig::from_file(path).await?,
        None => TargetConfig::from_env()?,
    };
    info!(
        node_id = %config.node_id,
        data_dir = %config.data_dir.display(),
        "Loaded configuration"
    );

    let bind_address = config.bind_address.clone();
    let node = Arc::new(
        TargetNode::new(config)
            .await
            .context("Failed to create target node")?,
    );

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("Storage target running on http://{}", bind_address);

    let shutdown_node = Arc::clone(&node);
    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown_node.shutdown();
        })
        .await
        .context("server failed")
}
