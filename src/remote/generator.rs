//! Control client for the traffic generator's TCP endpoint.
//!
//! The endpoint speaks a line protocol. Mutating commands (`start all`,
//! `stop all`, `reset stats`, `speed <core> <pct>`, `pkt_size <core> <bytes>`)
//! are send-only; queries reply with one comma-separated line each:
//!
//! - `tot stats`            -> `<rx>,<tx>,<tsc>`
//! - `port stats <port>`    -> `<rx>,<tx>`
//! - `lat stats <core>`     -> `<min>,<max>,<avg>` (nanoseconds)
//! - `freq`                 -> `<hz>`

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{BenchError, Result};
use crate::remote::CmdOutput;
use crate::result::LatencyStats;

const CONNECT_ATTEMPTS: u32 = 30;
const CONNECT_BACKOFF_START: Duration = Duration::from_millis(250);
const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Global counter snapshot: packets received, sent, and the timestamp
/// counter value the snapshot was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalStats {
    pub rx: u64,
    pub tx: u64,
    pub tsc: u64,
}

/// Packet counters aggregated over a set of ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCounters {
    pub rx: u64,
    pub tx: u64,
}

/// A connected control session with one generator instance.
///
/// Holds the launch task of the remote process; dropping the handle aborts
/// it, which tears the remote generator down with the ssh session.
pub struct GeneratorHandle {
    peer: String,
    framed: Framed<TcpStream, LinesCodec>,
    launch: Option<JoinHandle<Result<CmdOutput>>>,
}

impl GeneratorHandle {
    /// Connect to an already-running generator's control endpoint.
    pub async fn connect(peer: &str, host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| BenchError::Transport {
                peer: peer.to_string(),
                detail: format!("connect {host}:{port}: {e}"),
            })?;
        debug!(peer, host, port, "connected to generator control endpoint");
        Ok(Self {
            peer: peer.to_string(),
            framed: Framed::new(stream, LinesCodec::new()),
            launch: None,
        })
    }

    /// Poll the control endpoint until the freshly launched generator
    /// accepts a connection, with bounded backoff.
    ///
    /// Bails out early when the launch command exits (its output becomes the
    /// error detail) or when the run is cancelled.
    pub(crate) async fn connect_with_retry(
        peer: &str,
        host: &str,
        port: u16,
        mut launch: JoinHandle<Result<CmdOutput>>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut backoff = CONNECT_BACKOFF_START;
        for attempt in 1..=CONNECT_ATTEMPTS {
            if launch.is_finished() {
                let detail = match (&mut launch).await {
                    Ok(Ok(out)) => format!("launch command exited: {}", out.output),
                    Ok(Err(err)) => err.to_string(),
                    Err(join_err) => join_err.to_string(),
                };
                return Err(BenchError::GeneratorUnready {
                    peer: peer.to_string(),
                    detail,
                });
            }

            match TcpStream::connect((host, port)).await {
                Ok(stream) => {
                    debug!(peer, attempt, "generator ready");
                    return Ok(Self {
                        peer: peer.to_string(),
                        framed: Framed::new(stream, LinesCodec::new()),
                        launch: Some(launch),
                    });
                }
                Err(err) => {
                    trace!(peer, attempt, %err, "control endpoint not ready yet");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => {
                    launch.abort();
                    return Err(BenchError::Interrupted);
                }
            }
            backoff = (backoff * 2).min(CONNECT_BACKOFF_MAX);
        }

        launch.abort();
        Err(BenchError::GeneratorUnready {
            peer: peer.to_string(),
            detail: format!("control endpoint unreachable after {CONNECT_ATTEMPTS} attempts"),
        })
    }

    async fn send(&mut self, cmd: String) -> Result<()> {
        trace!(peer = %self.peer, %cmd, "generator command");
        self.framed
            .send(cmd)
            .await
            .map_err(|e| BenchError::Protocol(format!("{}: send: {e}", self.peer)))
    }

    async fn request(&mut self, cmd: String) -> Result<String> {
        self.send(cmd).await?;
        match self.framed.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(BenchError::Protocol(format!("{}: recv: {e}", self.peer))),
            None => Err(BenchError::Protocol(format!(
                "{}: connection closed by generator",
                self.peer
            ))),
        }
    }

    pub async fn start_all(&mut self) -> Result<()> {
        self.send("start all".to_string()).await
    }

    pub async fn stop_all(&mut self) -> Result<()> {
        self.send("stop all".to_string()).await
    }

    pub async fn reset_stats(&mut self) -> Result<()> {
        self.send("reset stats".to_string()).await
    }

    pub async fn set_pkt_size(&mut self, cores: &[u32], size: u32) -> Result<()> {
        for core in cores {
            self.send(format!("pkt_size {core} {size}")).await?;
        }
        Ok(())
    }

    /// Set the transmit speed as a percentage of line rate.
    pub async fn set_speed(&mut self, cores: &[u32], speed: f64) -> Result<()> {
        for core in cores {
            self.send(format!("speed {core} {speed}")).await?;
        }
        Ok(())
    }

    pub async fn total_stats(&mut self) -> Result<TotalStats> {
        let line = self.request("tot stats".to_string()).await?;
        let fields = parse_u64_fields(&line, 3)?;
        Ok(TotalStats {
            rx: fields[0],
            tx: fields[1],
            tsc: fields[2],
        })
    }

    /// Packet counters summed over the given ports.
    pub async fn port_stats(&mut self, ports: &[u32]) -> Result<PortCounters> {
        let mut total = PortCounters { rx: 0, tx: 0 };
        for port in ports {
            let line = self.request(format!("port stats {port}")).await?;
            let fields = parse_u64_fields(&line, 2)?;
            total.rx += fields[0];
            total.tx += fields[1];
        }
        Ok(total)
    }

    /// Latency statistics per core, in the order the cores were given.
    pub async fn lat_stats(&mut self, cores: &[u32]) -> Result<Vec<LatencyStats>> {
        let mut stats = Vec::with_capacity(cores.len());
        for core in cores {
            let line = self.request(format!("lat stats {core}")).await?;
            let fields = parse_f64_fields(&line, 3)?;
            stats.push(LatencyStats {
                min_ns: fields[0],
                max_ns: fields[1],
                avg_ns: fields[2],
            });
        }
        Ok(stats)
    }

    /// Timestamp counter frequency of the generator machine.
    pub async fn hz(&mut self) -> Result<u64> {
        let line = self.request("freq".to_string()).await?;
        let fields = parse_u64_fields(&line, 1)?;
        Ok(fields[0])
    }
}

impl Drop for GeneratorHandle {
    fn drop(&mut self) {
        if let Some(launch) = self.launch.take() {
            launch.abort();
        }
    }
}

fn parse_u64_fields(line: &str, expected: usize) -> Result<Vec<u64>> {
    let fields: Vec<u64> = line
        .split(',')
        .map(|f| f.trim().parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| BenchError::Protocol(format!("bad counter line {line:?}: {e}")))?;
    if fields.len() != expected {
        return Err(BenchError::Protocol(format!(
            "expected {expected} fields, got {} in {line:?}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn parse_f64_fields(line: &str, expected: usize) -> Result<Vec<f64>> {
    let fields: Vec<f64> = line
        .split(',')
        .map(|f| f.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| BenchError::Protocol(format!("bad latency line {line:?}: {e}")))?;
    if fields.len() != expected {
        return Err(BenchError::Protocol(format!(
            "expected {expected} fields, got {} in {line:?}",
            fields.len()
        )));
    }
    Ok(fields)
}
