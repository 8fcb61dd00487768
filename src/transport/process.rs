//! Child-process Links
//!
//! The coordinator re-executes its own binary once per worker and talks to each child over
//! its stdin/stdout pipes, one JSON envelope per line. Workers keep stderr for logging.
//!
//! ## Lifecycle
//! 1. The coordinator spawns `n` children with `CLUSTER_WORKER_ID=<i>` (ids start at 1).
//! 2. Each worker connects its stdio to a transport, installs its handlers, then starts its
//!    pump and announces itself with `online`.
//! 3. The coordinator installs its own handlers, starts its pump and waits until all
//!    workers are online or the startup timeout elapses.
//! 4. A worker whose stdout closes is dropped from the route table.
//!
//! Messages that arrive before a pump is started wait in its inbox.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::link::{ChannelLink, Link};
use super::protocol::{Envelope, Message};
use super::service::Transport;
use super::types::{Process, ProcessId};
use crate::config::Config;

pub const WORKER_ID_ENV: &str = "CLUSTER_WORKER_ID";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Reads the next newline-delimited JSON value, skipping blank lines. `None` on EOF.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

fn spawn_writer<W>(
    mut writer: W,
    mut outbox: mpsc::UnboundedReceiver<Envelope>,
    peer: ProcessId,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(envelope) = outbox.recv().await {
            if let Err(e) = write_message(&mut writer, &envelope).await {
                tracing::warn!("Failed to write to process {}: {}", peer, e);
                break;
            }
        }
    })
}

/// The coordinator side of a group of worker processes.
pub struct WorkerGroup {
    pub transport: Arc<Transport>,
    inbox: Option<mpsc::UnboundedReceiver<Envelope>>,
    children: Vec<Child>,
    online: mpsc::UnboundedReceiver<ProcessId>,
    online_count: usize,
}

impl WorkerGroup {
    /// Spawns `config.effective_workers()` copies of the current executable.
    pub async fn spawn(config: &Config) -> Result<Self> {
        let count = config.effective_workers();
        let program = std::env::current_exe()?;

        let link = Arc::new(ChannelLink::new());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (online_tx, online_rx) = mpsc::unbounded_channel();
        let transport = Transport::new(Process::coordinator(), link.clone());

        let mut children = Vec::with_capacity(count);
        for n in 1..=count as u32 {
            let id = ProcessId(n);
            let mut child = Command::new(&program)
                .env(WORKER_ID_ENV, n.to_string())
                .envs(config.worker_env())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow::anyhow!("Worker {} has no stdin pipe", id))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow::anyhow!("Worker {} has no stdout pipe", id))?;

            let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
            link.add_route(id, outbox_tx);
            spawn_writer(stdin, outbox_rx, id);

            let inbox = inbox_tx.clone();
            let online = online_tx.clone();
            let worker_link = link.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout);
                loop {
                    match read_message::<_, Envelope>(&mut reader).await {
                        Ok(Some(envelope)) => {
                            if envelope.message == Message::Online {
                                let _ = online.send(id);
                            }
                            if inbox.send(envelope).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Dropping malformed line from worker {}: {}", id, e);
                        }
                    }
                }
                worker_link.disconnect(id);
                tracing::warn!("Worker {} exited", id);
            });

            tracing::info!("Spawned worker {} (pid {:?})", id, child.id());
            children.push(child);

            // Forks are staggered by 100 ms.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Ok(Self {
            transport,
            inbox: Some(inbox_rx),
            children,
            online: online_rx,
            online_count: 0,
        })
    }

    /// Starts dispatching worker messages. Call once every handler is installed.
    pub fn start(&mut self) {
        if let Some(inbox) = self.inbox.take() {
            self.transport.spawn_pump(inbox);
        }
    }

    /// Waits until every spawned worker sent `online`, or `timeout` elapses.
    ///
    /// Returns the number of workers online. A timeout is not an error.
    pub async fn wait_online(&mut self, timeout: Duration) -> usize {
        let expected = self.children.len();
        let deadline = tokio::time::Instant::now() + timeout;

        while self.online_count < expected {
            match tokio::time::timeout_at(deadline, self.online.recv()).await {
                Ok(Some(id)) => {
                    self.online_count += 1;
                    tracing::debug!("Worker {} online ({}/{})", id, self.online_count, expected);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Timeout reached, only {} workers online",
                        self.online_count
                    );
                    break;
                }
            }
        }

        self.online_count
    }

    pub fn worker_count(&self) -> usize {
        self.children.len()
    }

    pub async fn shutdown(mut self) {
        for child in self.children.iter_mut() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to stop worker: {}", e);
            }
        }
        tracing::info!("All workers stopped");
    }
}

/// The worker side: a transport whose only route leads to the parent coordinator.
pub struct ParentConnection {
    pub transport: Arc<Transport>,
    inbox: Option<mpsc::UnboundedReceiver<Envelope>>,
    reader: JoinHandle<()>,
}

impl ParentConnection {
    /// Connects stdin/stdout to a participant transport. Nothing is dispatched until `start`.
    pub fn connect(id: ProcessId) -> Result<Self> {
        let link = Arc::new(ChannelLink::new());
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        link.add_route(ProcessId::COORDINATOR, outbox_tx);
        spawn_writer(tokio::io::stdout(), outbox_rx, ProcessId::COORDINATOR);

        let transport = Transport::new(Process::participant(id), link.clone());

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(tokio::io::stdin());
            loop {
                match read_message::<_, Envelope>(&mut reader).await {
                    Ok(Some(envelope)) => {
                        if inbox_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => tracing::warn!("Dropping malformed line from coordinator: {}", e),
                }
            }
            link.disconnect(ProcessId::COORDINATOR);
            tracing::warn!("Channel to coordinator closed");
        });

        Ok(Self {
            transport,
            inbox: Some(inbox_rx),
            reader,
        })
    }

    /// Starts dispatching and announces `online` to the coordinator.
    pub fn start(&mut self) -> Result<()> {
        if let Some(inbox) = self.inbox.take() {
            self.transport.spawn_pump(inbox);
        }
        self.transport
            .send(ProcessId::COORDINATOR, Message::Online)?;
        tracing::info!("Worker {} online", self.transport.id());
        Ok(())
    }

    /// Resolves once the coordinator's end of the pipe is gone.
    pub async fn closed(self) {
        let _ = self.reader.await;
    }
}
