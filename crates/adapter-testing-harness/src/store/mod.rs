//! Local store servers and clients.
//!
//! Each store kind (objects, states) is served by a small TCP server
//! speaking newline-delimited JSON, plus a client handle the harness scripts
//! against. The pair shares its lifecycle: the server must report listening
//! before the client connects, and teardown destroys the client before the
//! server.
//!
//! The real host platform ships its own store implementations; these local
//! ones exist so a harness needs no installation, while keeping the same
//! get/set/subscribe surface and per-store publish-order delivery.

mod client;
mod protocol;
mod server;

pub use client::StoreClient;
pub use server::StoreServer;

use adapter_testing::StoreKind;
use thiserror::Error;

/// Errors raised by store clients and servers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A socket operation failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol frame could not be encoded or decoded.
    #[error("store codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The client could not connect within the configured timeout.
    #[error("timed out connecting to the {kind} store")]
    ConnectTimeout {
        /// The store the connection attempt targeted.
        kind: StoreKind,
    },

    /// The connection went away while a request was in flight.
    #[error("the {kind} store connection is closed")]
    ConnectionClosed {
        /// The store whose connection closed.
        kind: StoreKind,
    },
}
