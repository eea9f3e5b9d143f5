//! The local store server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use adapter_testing::{StoreKind, pattern_matches};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::StoreError;
use super::protocol::{Request, Response};
use crate::config::StoreSettings;

/// One store server listening on a local TCP port.
///
/// The server holds the key-value table and pushes a change frame to every
/// subscriber whose pattern matches a mutated id, in publish order. It is
/// intentionally trusting: it serves loopback test traffic only.
pub struct StoreServer {
    kind: StoreKind,
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    accept_task: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    entries: HashMap<String, Value>,
    subscribers: HashMap<u64, Subscriber>,
}

struct Subscriber {
    patterns: Vec<String>,
    tx: mpsc::UnboundedSender<Response>,
}

impl StoreServer {
    /// Binds the listener and starts accepting connections.
    ///
    /// Resolves once the socket is bound, which is the "server reports
    /// connected" half of the pair handshake.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when binding fails, typically because the
    /// fixed port is already in use.
    pub async fn listen(kind: StoreKind, settings: &StoreSettings) -> Result<Self, StoreError> {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(kind, listener, shutdown_rx));
        tracing::debug!(%kind, %local_addr, "store server listening");
        Ok(Self {
            kind,
            local_addr,
            shutdown: Some(shutdown),
            accept_task,
        })
    }

    /// The address the server actually bound.
    ///
    /// With port `0` in the settings this is the only way to learn the
    /// ephemeral port the clients must connect to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The store kind this server serves.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Stops accepting connections and drops all server state.
    pub async fn destroy(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.accept_task).await;
        tracing::debug!(kind = %self.kind, "store server destroyed");
    }
}

async fn accept_loop(
    kind: StoreKind,
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    let mut next_conn: u64 = 0;
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_conn += 1;
                    tracing::trace!(%kind, %peer, conn = next_conn, "store connection accepted");
                    connections.push(tokio::spawn(serve_connection(
                        next_conn,
                        stream,
                        Arc::clone(&shared),
                    )));
                }
                Err(error) => {
                    tracing::warn!(%kind, %error, "store accept failed");
                }
            },
            _ = &mut shutdown => break,
        }
    }
    for connection in connections {
        connection.abort();
    }
}

fn lock(shared: &Arc<Mutex<Shared>>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn serve_connection(conn_id: u64, stream: TcpStream, shared: Arc<Mutex<Shared>>) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    lock(&shared).subscribers.insert(
        conn_id,
        Subscriber {
            patterns: Vec::new(),
            tx,
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let Ok(mut line) = serde_json::to_string(&response) else {
                continue;
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    read_requests(conn_id, read_half, &shared).await;

    lock(&shared).subscribers.remove(&conn_id);
    // Dropping the subscriber closed the response channel; the writer ends
    // once it has drained what was already queued.
    let _ = writer.await;
}

async fn read_requests(conn_id: u64, read_half: OwnedReadHalf, shared: &Arc<Mutex<Shared>>) {
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(conn_id, request, shared),
            Err(error) => {
                tracing::warn!(conn = conn_id, %error, "dropping malformed store request");
            }
        }
    }
}

// Requests mutate the table and fan out changes under one lock so that
// per-store publish order is preserved for every subscriber.
fn handle_request(conn_id: u64, request: Request, shared: &Arc<Mutex<Shared>>) {
    let mut shared = lock(shared);
    match request {
        Request::Get { seq, id } => {
            let value = shared.entries.get(&id).cloned();
            reply_to(&shared, conn_id, Response::Reply { seq, value });
        }
        Request::Set { seq, id, value } => {
            shared.entries.insert(id.clone(), value.clone());
            reply_to(&shared, conn_id, Response::Reply { seq, value: None });
            for subscriber in shared.subscribers.values() {
                if subscriber
                    .patterns
                    .iter()
                    .any(|pattern| pattern_matches(pattern, &id))
                {
                    let _ = subscriber.tx.send(Response::Change {
                        id: id.clone(),
                        value: Some(value.clone()),
                    });
                }
            }
        }
        Request::Subscribe { seq, pattern } => {
            if let Some(subscriber) = shared.subscribers.get_mut(&conn_id) {
                subscriber.patterns.push(pattern);
            }
            reply_to(&shared, conn_id, Response::Reply { seq, value: None });
        }
    }
}

fn reply_to(shared: &Shared, conn_id: u64, response: Response) {
    if let Some(subscriber) = shared.subscribers.get(&conn_id) {
        let _ = subscriber.tx.send(response);
    }
}
