//! Line-oriented front end for the subscription gateway.
//!
//! Reads one JSON command per line from stdin and writes one JSON response
//! per line to stdout:
//!
//! ```text
//! {"op":"subscribe","remote_addr":"10.0.0.7:5000","header":{...},"body":{...}}
//! {"op":"unsubscribe","remote_addr":"10.0.0.7:5000","header":{...},"body":{...}}
//! {"op":"heartbeat","remote_addr":"10.0.0.7:5000","header":{...}}
//! ```
//!
//! Topology changes are logged as they are broadcast. Stops on EOF or Ctrl+C.

use anyhow::{Context, Result};
use mesh_subscribe_gateway::{
    BroadcastConsumerManager, Collaborators, GatewayConfig, HeartbeatRequest,
    HttpDeliveryAgreement, MeshResponse, StaticAclChecker, SubscribeRequest, SubscriptionGateway,
    TopologyEvent, UnsubscribeRequest,
};
use mesh_telemetry::{init_logging, TelemetryConfig};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Command {
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Heartbeat(HeartbeatRequest),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&TelemetryConfig::from_env()).context("failed to initialize logging")?;

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;

    let agreement = HttpDeliveryAgreement::new(config.webhook.handshake_timeout)?;
    let consumer_manager = Arc::new(BroadcastConsumerManager::new());
    let topology = consumer_manager.subscribe();

    // ACL rules are pushed by the control plane; none are known at startup
    let collaborators = Collaborators::new(
        Arc::new(StaticAclChecker::new(Vec::new())),
        Arc::new(agreement),
        consumer_manager,
    );
    let gateway = SubscriptionGateway::new(config, collaborators)?;
    let cleanup = gateway.spawn_cleanup()?;
    let watcher = tokio::spawn(log_topology(topology));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => execute(&gateway, command).await?,
            Err(e) => {
                warn!(error = %e, "Skipping malformed command");
                continue;
            }
        };

        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }

    gateway.shutdown();
    cleanup.await.context("cleanup task panicked")?;
    watcher.abort();

    info!(metrics = ?gateway.metrics().snapshot(), "Subscription gateway stopped");
    Ok(())
}

async fn execute(gateway: &SubscriptionGateway, command: Command) -> Result<MeshResponse> {
    let response = match command {
        Command::Subscribe(request) => gateway.subscribe(request).await?,
        Command::Unsubscribe(request) => gateway.unsubscribe(request).await?,
        Command::Heartbeat(request) => gateway.heartbeat(&request),
    };
    Ok(response)
}

async fn log_topology(mut events: broadcast::Receiver<TopologyEvent>) {
    loop {
        match events.recv().await {
            Ok(TopologyEvent::GroupUpdated { snapshot }) => info!(
                consumer_group = %snapshot.group,
                topics = snapshot.topics.len(),
                members = snapshot.members.len(),
                "Topology updated"
            ),
            Ok(TopologyEvent::GroupRemoved { group }) => {
                info!(consumer_group = %group, "Topology removed")
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Topology watcher lagged")
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
