//! The replication event loop and completion protocol.
//!
//! One `ReplicationJob` per in-flight snapshot transfer. The job owns the
//! slave link for its whole life and borrows the master link from the
//! dispatcher; on success the master link is handed back for reuse, on
//! failure both links are dropped. Each tick of the loop performs, in
//! order: heartbeat, bounded readiness wait, link service, link error
//! check, backpressure, iteration, and the drain sequence once the
//! iterator is exhausted.

use crate::core::error::{LinkSide, ShoalError, ShoalResult};
use crate::core::time::{bytes_human, elapsed_human, now_ms};
use crate::net::{link::Link, resp};
use crate::repl::cursor::{IterDriver, IterStep};
use crate::repl::pipeline::CompressPipeline;
use crate::repl::state::ReplState;
use crate::repl::{frame, ReplStats, MAX_PACKAGE_SIZE, MIN_PACKAGE_SIZE};
use crate::storage::{ReadOptions, Store, StoreSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::Interest;

/// Bounded readiness wait per tick.
const POLL_TIMEOUT_MS: u64 = 5;

/// Pause while the slave output backlog is above the limit.
const BACKPRESSURE_SLEEP_MS: u64 = 100;

/// Per-job parameters, fixed at construction.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Monotonic identifier of this snapshot attempt.
    pub repl_ts: u64,
    /// Slave host.
    pub peer_host: String,
    /// Slave port.
    pub peer_port: u16,
    /// Emit keepalives to the master link.
    pub heartbeat: bool,
    /// Compress batch payloads.
    pub compress: bool,
    /// Keepalive cadence in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Batch threshold when compressing.
    pub max_package_size: usize,
    /// Batch threshold when not compressing.
    pub min_package_size: usize,
}

impl JobOptions {
    /// Options from the replication config section.
    pub fn from_config(
        repl_ts: u64,
        peer_host: impl Into<String>,
        peer_port: u16,
        config: &crate::core::config::ReplicationConfig,
    ) -> Self {
        Self {
            repl_ts,
            peer_host: peer_host.into(),
            peer_port,
            heartbeat: config.heartbeat,
            compress: config.compress,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            max_package_size: config.max_package_size,
            min_package_size: config.min_package_size,
        }
    }

    fn defaults(repl_ts: u64, peer_host: impl Into<String>, peer_port: u16) -> Self {
        Self {
            repl_ts,
            peer_host: peer_host.into(),
            peer_port,
            heartbeat: true,
            compress: true,
            heartbeat_interval_ms: 5000,
            max_package_size: MAX_PACKAGE_SIZE,
            min_package_size: MIN_PACKAGE_SIZE,
        }
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.peer_host, self.peer_port)
    }

    /// Larger batches amortize compression overhead; smaller batches cut
    /// per-batch latency when there is no compressor.
    fn package_size(&self) -> usize {
        if self.compress {
            self.max_package_size
        } else {
            self.min_package_size
        }
    }

    fn backpressure_limit(&self) -> usize {
        self.max_package_size * 3
    }
}

/// One snapshot transfer.
pub struct ReplicationJob {
    opts: JobOptions,
    snapshot: StoreSnapshot,
    total_keys: u64,
    state: Arc<ReplState>,
    stats: Arc<ReplStats>,
    quit: Arc<AtomicBool>,
}

impl ReplicationJob {
    /// Build a job around an already-claimed snapshot handle.
    pub fn new(
        opts: JobOptions,
        snapshot: StoreSnapshot,
        total_keys: u64,
        state: Arc<ReplState>,
        quit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            opts,
            snapshot,
            total_keys,
            state,
            stats: Arc::new(ReplStats::default()),
            quit,
        }
    }

    /// Build a job with default options, for tests and embedders.
    pub fn with_defaults(
        repl_ts: u64,
        peer_host: impl Into<String>,
        peer_port: u16,
        snapshot: StoreSnapshot,
        total_keys: u64,
        state: Arc<ReplState>,
    ) -> Self {
        Self::new(
            JobOptions::defaults(repl_ts, peer_host, peer_port),
            snapshot,
            total_keys,
            state,
            Arc::new(AtomicBool::new(false)),
        )
    }

    /// Shared counters for this job, observable while it runs.
    pub fn stats(&self) -> Arc<ReplStats> {
        Arc::clone(&self.stats)
    }

    /// Run the transfer to completion.
    ///
    /// On success the master link is handed back for reuse (`Ok(Some)`),
    /// unless the final acknowledgement write failed (`Ok(None)`, link
    /// closed). On failure the job publishes `finish(false)`, sends an
    /// error frame to the master when the master link itself is still
    /// usable, and consumes both links.
    pub async fn run(self, mut master: Link) -> ShoalResult<Option<Link>> {
        let start = now_ms();
        let outcome = self.stream(&mut master).await;

        match outcome {
            Ok(()) => {
                self.state.finish(true);
                let elapsed = now_ms().saturating_sub(start);
                let sent = self.stats.sent_bytes();
                let speed = sent * 1000 / elapsed.max(1);
                tracing::info!(
                    "send snapshot[{}] to {} finished: dataSize {}, sentBytes {}, elapsed {}, speed {}/s",
                    self.opts.repl_ts,
                    self.opts.peer(),
                    bytes_human(self.stats.raw_bytes()),
                    bytes_human(sent),
                    elapsed_human(elapsed),
                    bytes_human(speed),
                );

                match master
                    .quick_send(&[b"ok".as_slice(), b"rr_transfer_snapshot finished".as_slice()])
                    .await
                {
                    Ok(()) => Ok(Some(master)),
                    Err(e) => {
                        tracing::error!("final master ack write failed, closing link: {}", e);
                        Ok(None)
                    }
                }
            }
            Err(err) => {
                tracing::error!(
                    "send snapshot[{}] to {} failed: {}",
                    self.opts.repl_ts,
                    self.opts.peer(),
                    err
                );
                if err.reports_to_master() {
                    resp::encode_error(&mut master.output, "ERR rr_transfer_snapshot error");
                    if let Err(e) = master.flush().await {
                        tracing::debug!("error frame to master not delivered: {}", e);
                    }
                }
                self.state.finish(false);
                Err(err)
            }
        }
    }

    /// Connect, handshake, stream every batch, and run the completion
    /// exchange. Pure transfer logic; terminal bookkeeping stays in
    /// `run`.
    async fn stream(&self, master: &mut Link) -> ShoalResult<()> {
        tracing::info!(
            "send snapshot[{}] to {} start",
            self.opts.repl_ts,
            self.opts.peer()
        );

        let mut slave = Link::connect(&self.opts.peer_host, self.opts.peer_port).await?;
        self.handshake(&mut slave).await?;
        tracing::info!("ssdb_sync2 handshake done");

        self.stream_batches(master, &mut slave).await?;
        self.complete(&mut slave).await
    }

    /// Send `ssdb_sync2 replts <n> [heartbeat 1]` in blocking mode and
    /// consume the slave's reply.
    async fn handshake(&self, slave: &mut Link) -> ShoalResult<()> {
        let ts = self.opts.repl_ts.to_string();
        let mut hello: Vec<&[u8]> = vec![b"ssdb_sync2", b"replts", ts.as_bytes()];
        if self.opts.heartbeat {
            hello.push(b"heartbeat");
            hello.push(b"1");
        }
        slave.send_cmd(&hello).await?;

        match slave.read_reply().await {
            Ok(Some(_reply)) => Ok(()),
            Ok(None) => Err(ShoalError::SlaveConnectFailed {
                peer: self.opts.peer(),
                message: "closed during handshake".to_string(),
            }),
            Err(e) => Err(ShoalError::SlaveConnectFailed {
                peer: self.opts.peer(),
                message: e.to_string(),
            }),
        }
    }

    /// The per-tick event loop: heartbeat, poll, service, error check,
    /// backpressure, iterate, drain at EOF.
    async fn stream_batches(&self, master: &mut Link, slave: &mut Link) -> ShoalResult<()> {
        let opts = ReadOptions::full_scan(self.snapshot.clone());
        let mut driver = IterDriver::new(Store::new_iterator(&opts), self.total_keys);
        let mut pipeline = CompressPipeline::new(self.opts.compress);

        let package_size = self.opts.package_size();
        let backpressure_limit = self.opts.backpressure_limit();
        let mut iterator_done = false;
        let mut last_heartbeat = now_ms();

        loop {
            if self.quit.load(Ordering::Relaxed) {
                return Err(ShoalError::internal("quit flag set during transfer"));
            }

            // heartbeat toward the upstream coordinator
            if self.opts.heartbeat {
                let now = now_ms();
                if now.saturating_sub(last_heartbeat) > self.opts.heartbeat_interval_ms {
                    if !master.output.is_empty() {
                        tracing::debug!("master output not empty at heartbeat, upstream blocked?");
                    }
                    resp::encode_status(&mut master.output, "rr_transfer_snapshot continue");
                    if master.append_reply {
                        resp::encode_bulk_array(&mut master.output, &[b"check 0".as_slice()]);
                    }
                    last_heartbeat = now;
                }
            }

            self.poll_links(master, slave).await?;

            if master.error() {
                tracing::warn!("link to upstream coordinator broken");
                return Err(ShoalError::LinkBroken {
                    side: LinkSide::Master,
                });
            }
            if slave.error() {
                tracing::warn!("link to slave node broken");
                return Err(ShoalError::LinkBroken {
                    side: LinkSide::Slave,
                });
            }

            // backpressure: pause production while the slave drains
            if slave.output.len() > backpressure_limit {
                tracing::debug!(
                    backlog = slave.output.len(),
                    "slave output backlog, delaying iteration"
                );
                tokio::time::sleep(Duration::from_millis(BACKPRESSURE_SLEEP_MS)).await;
                continue;
            }

            let mut finished = true;
            if !iterator_done {
                match driver.fill(pipeline.staging(), package_size, &self.stats) {
                    IterStep::More => {
                        self.stats.add_raw(pipeline.staging_len());
                        pipeline.drain(&mut slave.output).await?;
                        pipeline.submit(&mut slave.output)?;
                        let n = slave.try_write();
                        self.stats.add_sent(n);
                        finished = false;
                    }
                    IterStep::Done => {
                        iterator_done = true;
                        tracing::info!("iterator done");
                    }
                }
            }

            if finished {
                pipeline.drain(&mut slave.output).await?;
                if !pipeline.staging_is_empty() {
                    self.stats.add_raw(pipeline.staging_len());
                    pipeline.flush(&mut slave.output).await?;
                }
                let n = slave.try_write();
                self.stats.add_sent(n);
                if slave.error() {
                    return Err(ShoalError::LinkBroken {
                        side: LinkSide::Slave,
                    });
                }
                if slave.output.is_empty() {
                    return Ok(());
                }
                tracing::debug!("waiting for slave output buffer to drain");
            }
        }
    }

    /// Bounded readiness wait over both links, then one non-blocking
    /// service pass for whichever became ready.
    async fn poll_links(&self, master: &mut Link, slave: &mut Link) -> ShoalResult<()> {
        fn interest_for(link: &Link) -> Interest {
            if link.output.is_empty() {
                Interest::READABLE
            } else {
                Interest::READABLE | Interest::WRITABLE
            }
        }

        let master_interest = interest_for(master);
        let slave_interest = interest_for(slave);

        let wait = tokio::time::timeout(Duration::from_millis(POLL_TIMEOUT_MS), async {
            tokio::select! {
                ready = master.ready(master_interest) => (LinkSide::Master, ready),
                ready = slave.ready(slave_interest) => (LinkSide::Slave, ready),
            }
        })
        .await;

        let (side, ready) = match wait {
            Err(_elapsed) => return Ok(()),
            Ok((_, Err(e))) => {
                return Err(ShoalError::PollFailed {
                    message: e.to_string(),
                });
            }
            Ok((side, Ok(ready))) => (side, ready),
        };

        let link = match side {
            LinkSide::Master => master,
            LinkSide::Slave => slave,
        };
        if ready.is_readable() || ready.is_read_closed() {
            // upstream chatter is buffered and ignored; EOF flips the
            // error flag
            link.try_read();
        }
        if (ready.is_writable() || ready.is_write_closed()) && !link.output.is_empty() {
            let n = link.try_write();
            if side == LinkSide::Slave {
                self.stats.add_sent(n);
            }
        }
        Ok(())
    }

    /// The completion exchange: `complete`, one reply frame, verdict.
    async fn complete(&self, slave: &mut Link) -> ShoalResult<()> {
        frame::append_string(&mut slave.output, frame::COMPLETE_TOKEN);
        match slave.flush().await {
            Ok(n) => self.stats.add_sent(n),
            Err(_) => {
                return Err(ShoalError::LinkBroken {
                    side: LinkSide::Slave,
                })
            }
        }

        let reply = match slave.read_reply().await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("completion ack unreadable: {}", e);
                None
            }
        };

        match reply {
            Some(fields) if !fields.is_empty() => {
                let hex = fields
                    .iter()
                    .map(|f| hexstr(f))
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::info!("slave completion ack: {}", hex);

                if fields[0] == b"failed" || fields[0] == b"error" {
                    Err(ShoalError::SlaveRejectedCompletion)
                } else {
                    Ok(())
                }
            }
            _ => Err(ShoalError::SlaveRejectedCompletion),
        }
    }
}

fn hexstr(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
