//! Session registry
//!
//! The boundary consumed by the HTTP layer: hand it each established
//! websocket and it runs a [`Session`] for it on its own task.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{Sink, Stream};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use super::session::{Session, SessionHandle, SessionId};
use crate::table::Table;
use crate::wire::{CodecConfig, WireFormat};

/// Route the websocket upgrade is served on
pub const WEBSOCKET_PATH: &str = "/networktables/ws";

/// Route the client-side assets are served under
pub const STATIC_MOUNT: &str = "/networktables";

/// Default per-session send queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

const CLIENT_SCRIPT: &str = include_str!("../../assets/networktables.js");

/// Client-side assets shipped with the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResources {
    /// URL prefix to serve `dir` under
    pub mount: &'static str,
    /// Directory holding the assets on disk
    pub dir: PathBuf,
}

impl StaticResources {
    /// The assets bundled with this crate
    pub fn bundled() -> Self {
        Self {
            mount: STATIC_MOUNT,
            dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/assets")),
        }
    }

    /// Name of the browser client script within `dir`
    pub fn script_name(&self) -> &'static str {
        "networktables.js"
    }

    /// URL the browser client script is served at
    pub fn script_url(&self) -> String {
        format!("{}/{}", self.mount, self.script_name())
    }

    /// The browser client script, embedded at compile time
    pub fn script(&self) -> &'static str {
        CLIENT_SCRIPT
    }

    /// Whether the bundled script can read what a bridge using `format` sends
    pub fn script_supports(&self, format: WireFormat) -> bool {
        format == WireFormat::Json
    }
}

/// Creates and tracks one session per client connection
pub struct SessionRegistry {
    table: Arc<dyn Table>,
    codec: CodecConfig,
    queue_capacity: usize,
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(table: Arc<dyn Table>, codec: CodecConfig) -> Self {
        Self::with_queue_capacity(table, codec, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        table: Arc<dyn Table>,
        codec: CodecConfig,
        queue_capacity: usize,
    ) -> Self {
        Self {
            table,
            codec,
            queue_capacity,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    /// Start a session for a freshly negotiated websocket. Must be called
    /// from within a tokio runtime.
    pub fn on_connection_established<S>(&self, socket: S) -> SessionHandle
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Unpin
            + Send
            + 'static,
    {
        let (session, handle) = Session::new(
            socket,
            Arc::clone(&self.table),
            self.codec,
            self.queue_capacity,
        );
        let id = handle.id().clone();
        self.sessions.insert(id.clone(), handle.clone());
        debug!(session = %id, live = self.sessions.len(), "Session registered");

        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            session.run().await;
            sessions.remove(&id);
            debug!(session = %id, live = sessions.len(), "Session deregistered");
        });

        handle
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Handles of all live sessions
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Close every live session and wait for each to finish. Returns how many
    /// were closed.
    pub async fn shutdown(&self) -> usize {
        let handles = self.handles();
        for handle in &handles {
            handle.close();
        }
        for handle in &handles {
            handle.closed().await;
        }
        if !handles.is_empty() {
            info!(sessions = handles.len(), "Closed all sessions");
        }
        handles.len()
    }

    pub fn static_resources(&self) -> StaticResources {
        StaticResources::bundled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_resources() {
        let resources = StaticResources::bundled();
        assert_eq!(resources.mount, "/networktables");
        assert_eq!(resources.script_url(), "/networktables/networktables.js");
        assert!(resources.dir.join(resources.script_name()).exists());
        assert!(resources.script().contains(WEBSOCKET_PATH));
    }

    #[test]
    fn test_bundled_script_reads_json_only() {
        let resources = StaticResources::bundled();
        assert!(resources.script_supports(WireFormat::Json));
        assert!(!resources.script_supports(WireFormat::Cbor));
        assert!(resources.script().contains(r#"typeof event.data !== "string""#));
    }

    #[test]
    fn test_websocket_path_under_mount() {
        assert!(WEBSOCKET_PATH.starts_with(STATIC_MOUNT));
    }
}
