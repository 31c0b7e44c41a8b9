// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use wapbox_core::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    compile::PassthroughCompiler,
    gateway::Gateway,
    http::ReqwestHttpClient,
};

/// Reads `argv[1]`/`argv[2]` as the wapbox config path and the logger
/// config path, falling back to the conventional relative locations a
/// deployment keeps them at.
fn parse_args() -> (String, String) {
    let mut args = std::env::args().skip(1);
    let config = args.next().unwrap_or_else(|| "wapbox.conf.yaml".to_string());
    let logger_config = args.next().unwrap_or_else(|| "wapbox-logger.yaml".to_string());
    (config, logger_config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config_path, logger_config_path) = parse_args();

    let _logger_guard = init_logger(&logger_config_path).context("failed to initialize logging")?;

    let cfg = resolve_config_path(&config_path)
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    info!(bearerbox_host = %cfg.bearerbox_host, bearerbox_port = cfg.bearerbox_port, "starting wapbox");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            shutdown.cancel();
        }
    });

    let http_client = Arc::new(ReqwestHttpClient::new());
    let compiler = Arc::new(PassthroughCompiler);

    Gateway::new(cfg, http_client, compiler, cancel)
        .run()
        .await
        .context("gateway exited")
}
