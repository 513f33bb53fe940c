//! Thin command channel.
//!
//! The core contract is "already-deserialized commands in, typed
//! responses out"; this module is the minimal line-delimited JSON shim
//! that carries them between nameservers and clients. One JSON command
//! per line, one JSON response per line.

use crate::service::{CommandResponse, NameNodeService};
use anyhow::Result;
use async_trait::async_trait;
use ridgefs_common::{Command, Error, NodeRole};
use ridgefs_failover::{PeerTransport, RoleCoordinator};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accept connections and serve commands until shutdown.
pub async fn serve(
    listener: TcpListener,
    service: Arc<NameNodeService>,
    coordinator: Option<Arc<RoleCoordinator>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "command channel listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                // Quorum membership comes from the configured peer
                // list; an inbound connection is a client, never a
                // voter. While a promotion round is deciding, new
                // connections are turned away.
                if let Some(c) = &coordinator
                    && c.promotion_in_flight()
                {
                    warn!(peer = %peer_addr, "rejecting connection during promotion");
                    continue;
                }
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &service).await {
                        debug!(peer = %peer_addr, "connection closed: {e}");
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("command channel shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, service: &NameNodeService) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => service.dispatch(command),
            Err(e) => CommandResponse::Error(format!("malformed command: {e}")),
        };
        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
    }
    Ok(())
}

/// One-shot request/response client for a peer nameserver.
pub struct NameClient;

impl NameClient {
    /// Send `command` to `addr` and await the single response line.
    pub async fn call(addr: &str, command: &Command) -> ridgefs_common::Result<CommandResponse> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::PeerUnreachable(format!("{addr}: {e}")))?;
        let (reader, mut writer) = stream.into_split();

        let mut payload = serde_json::to_string(command)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        payload.push('\n');
        writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| Error::PeerUnreachable(format!("{addr}: {e}")))?;

        let mut lines = BufReader::new(reader).lines();
        let line = lines
            .next_line()
            .await
            .map_err(|e| Error::PeerUnreachable(format!("{addr}: {e}")))?
            .ok_or_else(|| Error::PeerUnreachable(format!("{addr}: closed without response")))?;
        serde_json::from_str(&line).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// `PeerTransport` over the JSON command channel: ask each peer for its
/// view of the primary via a liveness query.
pub struct ChannelTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datanodes::StaticDataNodeDirectory;
    use ridgefs_journal::EditLog;
    use ridgefs_namespace::NamespaceTree;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_client_connections_are_not_voters() {
        let dir = tempdir().unwrap();
        let tree = Arc::new(NamespaceTree::new());
        let log = Arc::new(EditLog::open(dir.path().join("editlog"), 1024 * 1024).unwrap());
        let datanodes = Arc::new(StaticDataNodeDirectory::new([]));
        let coordinator = Arc::new(RoleCoordinator::new(
            1,
            ["peer-a:7000".to_string(), "peer-b:7000".to_string()],
            Duration::from_millis(200),
        ));
        let service = Arc::new(NameNodeService::new(
            tree,
            log,
            datanodes,
            NodeRole::Standby,
            Some(Arc::clone(&coordinator)),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(
            listener,
            service,
            Some(Arc::clone(&coordinator)),
            shutdown_rx,
        ));

        let response = NameClient::call(&addr, &Command::LivenessQuery).await.unwrap();
        assert!(matches!(response, CommandResponse::Role { .. }));

        // The connection was served but the configured quorum
        // membership is untouched by it.
        assert_eq!(coordinator.peer_count(), 2);
        assert_eq!(coordinator.quorum_required(), 2);

        let _ = shutdown_tx.send(true);
        let _ = server.await;
    }
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    async fn probe_primary(&self, peer: &str) -> ridgefs_common::Result<bool> {
        match NameClient::call(peer, &Command::LivenessQuery).await? {
            CommandResponse::Role {
                role,
                primary_reachable,
            } => Ok(role == NodeRole::Primary || primary_reachable),
            other => Err(Error::internal(format!(
                "unexpected liveness response: {other:?}"
            ))),
        }
    }
}
