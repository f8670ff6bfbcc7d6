use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::Map;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::protocol::{AgentRecord, ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(about = "Switchboard relay hub and controller probe")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect as a controller, print the agent roster, optionally issue one
    /// command
    Probe {
        /// Relay base URL
        #[arg(short, long, default_value = "ws://localhost:3001")]
        url: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Logical command to issue once the roster arrives
        #[arg(short, long)]
        command: Option<String>,

        /// Target agent uid, required with --command
        #[arg(short, long)]
        target: Option<String>,
    },
}

pub async fn run_probe(
    url: String,
    email: String,
    password: String,
    command: Option<String>,
    target: Option<String>,
) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!(%ws_url, "connecting");

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(connected)) => connected,
        Ok(Err(err)) => return Err(anyhow!("connection to {ws_url} failed: {err}")),
        Err(_) => bail!("connection timeout - is the relay running at {url}?"),
    };
    let (mut write, mut read) = ws_stream.split();

    let register = ClientMessage::RegisterControllerWithCredentials { email, password };
    write
        .send(Message::Text(serde_json::to_string(&register)?.into()))
        .await
        .context("failed to send registration")?;

    let roster = timeout(Duration::from_secs(10), async {
        while let Some(frame) = read.next().await {
            let frame = frame.context("websocket error")?;
            let Message::Text(text) = frame else { continue };
            match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::AgentList { agents } => return Ok(agents),
                ServerMessage::AuthError { message } => bail!("registration refused: {message}"),
                other => debug!(?other, "ignoring message while waiting for roster"),
            }
        }
        bail!("connection closed before the roster arrived")
    })
    .await
    .context("timed out waiting for the roster")??;

    print_roster(&roster);

    if let Some(command) = command {
        let target =
            target.context("--target is required when --command is given")?;
        write
            .send(Message::Text(
                serde_json::to_string(&ClientMessage::IssueCommand {
                    command: command.clone(),
                    target_uid: target.clone(),
                    params: Map::new(),
                })?
                .into(),
            ))
            .await
            .context("failed to send command")?;

        // Success produces no echo to the issuer; only failures come back.
        match timeout(Duration::from_secs(2), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(ServerMessage::CommandError { message }) =
                    serde_json::from_str::<ServerMessage>(&text)
                {
                    bail!("command rejected: {message}");
                }
                println!("{command} dispatched to {target}");
            }
            _ => println!("{command} dispatched to {target}"),
        }
    }

    Ok(())
}

fn print_roster(agents: &[AgentRecord]) {
    println!("{} agent(s) connected", agents.len());
    for agent in agents {
        let device = agent.device.as_deref().unwrap_or("unknown device");
        let connected_at = agent
            .connected_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<24} {:<20} since {}", agent.uid, device, connected_at);
    }
}
