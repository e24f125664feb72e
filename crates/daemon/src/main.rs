// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use wormhole::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = wormhole::run::run(config).await {
        error!("fatal: {e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
