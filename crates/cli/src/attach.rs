// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attach an interactive terminal to a session's conversation.
//!
//! Resolves the driver's native session id over the control socket, then
//! replaces this process with the multiplexer hosting the driver's resume
//! command inside the session's working directory.

use std::os::unix::process::CommandExt;

use anyhow::Context;
use wormhole::control::ControlRequest;
use wormhole::protocol::SessionInfo;

use crate::control::ControlClient;

#[derive(Debug, clap::Args)]
pub struct AttachArgs {
    /// Session name to attach to.
    pub name: String,

    /// Terminal multiplexer used to host the interactive session.
    #[arg(long, default_value = "tmux")]
    pub mux: String,

    /// Driver binary invoked with the resumed conversation.
    #[arg(long, default_value = "claude")]
    pub driver: String,
}

pub async fn run(args: AttachArgs, client: &ControlClient) -> anyhow::Result<()> {
    let resolved = client
        .call(&ControlRequest::ResolveAttach { name: args.name.clone() })
        .await?;
    let driver_session_id = resolved["driver_session_id"]
        .as_str()
        .context("daemon did not return a driver_session_id")?
        .to_owned();

    let listed = client.call(&ControlRequest::List).await?;
    let sessions: Vec<SessionInfo> = serde_json::from_value(listed)?;
    let session = sessions
        .into_iter()
        .find(|s| s.name == args.name)
        .with_context(|| format!("session {} disappeared", args.name))?;

    let argv = mux_command(&args.mux, &args.name, &session.directory, &args.driver, &driver_session_id);
    let err = std::process::Command::new(&argv[0]).args(&argv[1..]).exec();
    // exec only returns on failure.
    Err(anyhow::Error::new(err).context(format!("failed to exec {}", argv[0])))
}

/// Build the multiplexer invocation that hosts the resumed conversation.
fn mux_command(
    mux: &str,
    name: &str,
    directory: &str,
    driver: &str,
    driver_session_id: &str,
) -> Vec<String> {
    vec![
        mux.to_owned(),
        "new-session".to_owned(),
        "-A".to_owned(),
        "-s".to_owned(),
        format!("wormhole-{name}"),
        "-c".to_owned(),
        directory.to_owned(),
        driver.to_owned(),
        "--resume".to_owned(),
        driver_session_id.to_owned(),
    ]
}

#[cfg(test)]
#[path = "attach_tests.rs"]
mod tests;
