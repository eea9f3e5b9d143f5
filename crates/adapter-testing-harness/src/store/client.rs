//! The store client handle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use adapter_testing::{ChangeEvent, State, StoreKind};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::StoreError;
use super::protocol::{Request, Response};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Option<Value>>>>>;

/// A client connection to one local store server.
///
/// The client becomes usable only after the connect handshake succeeded,
/// which the harness sequences strictly after its paired server reported
/// listening. Change notifications for subscribed ids are forwarded to the
/// channel supplied at connect time, in the order the server published them.
pub struct StoreClient {
    kind: StoreKind,
    next_seq: AtomicU64,
    pending: PendingMap,
    line_tx: mpsc::UnboundedSender<String>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl StoreClient {
    /// Connects to a store server and starts the read/write tasks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectTimeout`] when the TCP connect does not
    /// succeed within `connect_timeout`, or [`StoreError::Io`] when it fails
    /// outright.
    pub async fn connect(
        kind: StoreKind,
        addr: SocketAddr,
        connect_timeout: Duration,
        change_tx: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<Self, StoreError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| StoreError::ConnectTimeout { kind })??;
        let (read_half, mut write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<Response>(&line) {
                    Ok(Response::Reply { seq, value }) => {
                        let sender = reader_pending
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&seq);
                        if let Some(sender) = sender {
                            let _ = sender.send(value);
                        }
                    }
                    Ok(Response::Change { id, value }) => {
                        let _ = change_tx.send(ChangeEvent::new(id, value));
                    }
                    Err(error) => {
                        tracing::warn!(%kind, %error, "dropping malformed store response");
                    }
                }
            }
        });

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(async move {
            while let Some(mut line) = line_rx.recv().await {
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        tracing::debug!(%kind, %addr, "store client connected");
        Ok(Self {
            kind,
            next_seq: AtomicU64::new(1),
            pending,
            line_tx,
            reader_task,
            writer_task,
        })
    }

    /// The store kind this client talks to.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn request(&self, request: Request, seq: u64) -> Result<Option<Value>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seq, tx);
        let line = serde_json::to_string(&request)?;
        self.line_tx
            .send(line)
            .map_err(|_| StoreError::ConnectionClosed { kind: self.kind })?;
        rx.await
            .map_err(|_| StoreError::ConnectionClosed { kind: self.kind })
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Reads the raw value stored under `id`.
    ///
    /// # Errors
    ///
    /// Fails when the connection is closed or the frame cannot be encoded.
    pub async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let seq = self.next_seq();
        self.request(
            Request::Get {
                seq,
                id: id.to_string(),
            },
            seq,
        )
        .await
    }

    /// Stores `value` under `id`, notifying matching subscribers.
    ///
    /// # Errors
    ///
    /// Fails when the connection is closed or the frame cannot be encoded.
    pub async fn set(&self, id: &str, value: Value) -> Result<(), StoreError> {
        let seq = self.next_seq();
        self.request(
            Request::Set {
                seq,
                id: id.to_string(),
                value,
            },
            seq,
        )
        .await?;
        Ok(())
    }

    /// Stores a [`State`] under `id`.
    ///
    /// # Errors
    ///
    /// Fails when the state cannot be serialised or the connection is closed.
    pub async fn set_state(&self, id: &str, state: &State) -> Result<(), StoreError> {
        self.set(id, serde_json::to_value(state)?).await
    }

    /// Subscribes this connection to ids matching `pattern`.
    ///
    /// # Errors
    ///
    /// Fails when the connection is closed or the frame cannot be encoded.
    pub async fn subscribe(&self, pattern: &str) -> Result<(), StoreError> {
        let seq = self.next_seq();
        self.request(
            Request::Subscribe {
                seq,
                pattern: pattern.to_string(),
            },
            seq,
        )
        .await?;
        Ok(())
    }

    /// Closes the connection and waits for the background tasks to finish.
    pub async fn destroy(self) {
        let Self {
            kind,
            line_tx,
            reader_task,
            writer_task,
            ..
        } = self;
        // Closing the outgoing queue ends the writer, which drops the write
        // half and lets the server observe the disconnect.
        drop(line_tx);
        let _ = writer_task.await;
        reader_task.abort();
        let _ = reader_task.await;
        tracing::debug!(%kind, "store client destroyed");
    }
}
