// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod attach;
mod control;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use wormhole::control::ControlRequest;
use wormhole::protocol::SessionInfo;

use crate::control::ControlClient;

/// Remote control for AI coding agents.
#[derive(Parser)]
#[command(name = "wormhole", version, about)]
struct Cli {
    /// Control socket path of the local daemon.
    #[arg(long, env = "WORMHOLE_CONTROL_SOCKET", global = true)]
    control_socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a session in a directory.
    Open {
        directory: PathBuf,
        /// Session name (default: auto-generated from the directory).
        #[arg(long)]
        name: Option<String>,
    },
    /// Close a session.
    Close { name: String },
    /// List sessions.
    List,
    /// Show daemon status.
    Status,
    /// Attach an interactive terminal to a session's conversation.
    Attach(attach::AttachArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = ControlClient::new(cli.control_socket.clone());

    if let Err(e) = dispatch(cli.command, &client).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands, client: &ControlClient) -> anyhow::Result<()> {
    match command {
        Commands::Open { directory, name } => {
            let directory = std::path::absolute(&directory)
                .with_context(|| format!("cannot resolve {}", directory.display()))?;
            let result = client
                .call(&ControlRequest::Open { name, directory, options: json!({}) })
                .await?;
            let opened = result["name"].as_str().unwrap_or_default();
            println!("opened {opened}");
        }

        Commands::Close { name } => {
            client.call(&ControlRequest::Close { name: name.clone() }).await?;
            println!("closed {name}");
        }

        Commands::List => {
            let result = client.call(&ControlRequest::List).await?;
            let sessions: Vec<SessionInfo> = serde_json::from_value(result)?;
            if sessions.is_empty() {
                println!("no sessions");
                return Ok(());
            }
            for s in sessions {
                println!(
                    "{:<20} {:<18} ${:<8.2} {}",
                    s.name,
                    s.state.as_str(),
                    s.cost_usd,
                    s.directory,
                );
            }
        }

        Commands::Status => {
            let result = client.call(&ControlRequest::Status).await?;
            println!(
                "wormholed {} pid {} port {} sessions {}",
                result["version"].as_str().unwrap_or("?"),
                result["pid"],
                result["port"],
                result["sessions"],
            );
        }

        Commands::Attach(args) => attach::run(args, client).await?,
    }
    Ok(())
}
