//! Coordinator-facing command loop.
//!
//! Accepts connections from the upstream coordinator, parses RESP command
//! arrays, and services the small command surface the replication flow
//! needs: PING, SET/GET/DEL, and the `rr_*` snapshot lifecycle. A
//! `rr_transfer_snapshot` hands the connection to a [`ReplicationJob`] as
//! the master link; on success the link comes back and keeps serving
//! commands.

use crate::core::config::Config;
use crate::core::error::{ShoalError, ShoalResult};
use crate::net::{link::Link, resp};
use crate::repl::{JobOptions, ReplState, ReplicationJob};
use crate::storage::Store;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// A Shoal node: store, replication state, and the coordinator listener.
pub struct Server {
    store: Arc<Store>,
    state: Arc<ReplState>,
    config: Config,
    quit: Arc<AtomicBool>,
    next_repl_ts: AtomicU64,
}

impl Server {
    /// Create a node with an empty store.
    pub fn new(config: Config) -> Self {
        Self {
            store: Arc::new(Store::new()),
            state: Arc::new(ReplState::new()),
            config,
            quit: Arc::new(AtomicBool::new(false)),
            next_repl_ts: AtomicU64::new(1),
        }
    }

    /// The node's store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The node's replication state.
    pub fn state(&self) -> &Arc<ReplState> {
        &self.state
    }

    /// Ask running jobs and the accept loop to stop.
    pub fn shutdown(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    /// Accept coordinator connections until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> ShoalResult<()> {
        loop {
            if self.quit.load(Ordering::Relaxed) {
                return Ok(());
            }
            let (stream, addr) = listener.accept().await?;
            if self.config.server.nodelay {
                let _ = stream.set_nodelay(true);
            }
            tracing::info!("coordinator connected from {}", addr);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_conn(Link::new(stream, addr)).await;
                tracing::info!("coordinator {} disconnected", addr);
            });
        }
    }

    async fn handle_conn(&self, mut link: Link) {
        loop {
            let cmd = match read_command(&mut link).await {
                Ok(Some(cmd)) => cmd,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("bad command from {}: {}", link.peer_addr(), e);
                    return;
                }
            };
            if cmd.is_empty() {
                continue;
            }

            let name = String::from_utf8_lossy(&cmd[0]).to_ascii_lowercase();
            match name.as_str() {
                "ping" => resp::encode_status(&mut link.output, "PONG"),
                "set" if cmd.len() == 3 => {
                    self.store.put(cmd[1].clone(), cmd[2].clone());
                    resp::encode_status(&mut link.output, "OK");
                }
                "get" if cmd.len() == 2 => match self.store.get(&cmd[1]) {
                    Some(value) => resp::encode_bulk(&mut link.output, &value),
                    None => resp::encode_null(&mut link.output),
                },
                "del" if cmd.len() == 2 => {
                    let removed = self.store.delete(&cmd[1]);
                    resp::encode_integer(&mut link.output, removed as i64);
                }
                "rr_make_snapshot" => {
                    self.state.install_snapshot(self.store.snapshot());
                    tracing::info!("snapshot installed, {} keys", self.store.size());
                    resp::encode_status(&mut link.output, "OK");
                }
                "rr_del_snapshot" => {
                    self.state.drop_snapshot();
                    resp::encode_status(&mut link.output, "OK");
                }
                "rr_transfer_snapshot" if cmd.len() == 3 => {
                    match self.transfer_snapshot(link, &cmd[1], &cmd[2]).await {
                        Some(returned) => link = returned,
                        None => return,
                    }
                    continue;
                }
                _ => resp::encode_error(
                    &mut link.output,
                    &format!("ERR unknown command '{}'", name),
                ),
            }

            if link.flush().await.is_err() {
                return;
            }
        }
    }

    /// Run one snapshot transfer on this connection. Returns the master
    /// link when it survives for further commands.
    async fn transfer_snapshot(&self, mut link: Link, host: &[u8], port: &[u8]) -> Option<Link> {
        let peer = match parse_peer(host, port) {
            Ok(peer) => peer,
            Err(e) => {
                resp::encode_error(&mut link.output, &format!("ERR {}", e));
                let _ = link.flush().await;
                return Some(link);
            }
        };

        let snapshot = match self.state.begin() {
            Ok(snapshot) => snapshot,
            Err(ShoalError::ReplicationBusy) => {
                resp::encode_error(&mut link.output, "ERR replication already in progress");
                let _ = link.flush().await;
                return Some(link);
            }
            Err(e) => {
                // no snapshot installed: the transfer never starts
                tracing::error!("rr_transfer_snapshot without snapshot: {}", e);
                resp::encode_error(&mut link.output, "ERR rr_transfer_snapshot error");
                let _ = link.flush().await;
                self.state.finish(false);
                return None;
            }
        };

        let repl_ts = self.next_repl_ts.fetch_add(1, Ordering::Relaxed);
        let opts = JobOptions::from_config(repl_ts, peer.0, peer.1, &self.config.replication);
        let job = ReplicationJob::new(
            opts,
            snapshot,
            self.store.size(),
            Arc::clone(&self.state),
            Arc::clone(&self.quit),
        );

        match job.run(link).await {
            Ok(returned) => returned,
            Err(_) => None,
        }
    }
}

fn parse_peer(host: &[u8], port: &[u8]) -> ShoalResult<(String, u16)> {
    let host = std::str::from_utf8(host)
        .map_err(|_| ShoalError::InvalidRequest {
            message: "non-utf8 host".to_string(),
        })?
        .to_string();
    let port: u16 = std::str::from_utf8(port)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ShoalError::InvalidRequest {
            message: "bad port".to_string(),
        })?;
    Ok((host, port))
}

/// Read one RESP command from the link, waiting for more bytes as needed.
///
/// Returns `None` on clean EOF.
async fn read_command(link: &mut Link) -> ShoalResult<Option<Vec<Vec<u8>>>> {
    loop {
        match resp::parse_command(link.input()) {
            resp::ParseResult::Complete(fields, consumed) => {
                link.consume_input(consumed);
                return Ok(Some(fields));
            }
            resp::ParseResult::Invalid(message) => {
                return Err(ShoalError::Protocol { message });
            }
            resp::ParseResult::Incomplete => {}
        }
        if link.fill_input().await? == 0 {
            return Ok(None);
        }
    }
}
