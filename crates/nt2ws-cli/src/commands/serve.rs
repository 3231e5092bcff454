//! Serve command
//!
//! Accepts TCP connections, performs the websocket handshake on the bridge
//! route and hands each negotiated socket to the session registry.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use nt2ws_core::{Config, MemoryTable, SessionRegistry, Table, WireFormat, WEBSOCKET_PATH};

use crate::output::Output;

/// Flags that override configuration for one run
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Interface to bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Address of the table's remote
    #[arg(long, conflicts_with = "team")]
    pub robot: Option<String>,

    /// Team number; connects to roborio-<team>-frc.local
    #[arg(long)]
    pub team: Option<u32>,

    /// Outbound wire format (json or cbor)
    #[arg(long)]
    pub format: Option<WireFormat>,

    /// Send a type label with every value
    #[arg(long)]
    pub type_tags: bool,

    /// Honour reconnect commands from clients
    #[arg(long)]
    pub allow_reconnect: Option<bool>,
}

impl ServeArgs {
    /// Apply these flags on top of `config`
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(robot) = &self.robot {
            config.robot = robot.clone();
            config.team = None;
        }
        if let Some(team) = self.team {
            config.team = Some(team);
            config.robot = nt2ws_core::config::DEFAULT_ROBOT.to_string();
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.type_tags {
            config.type_tags = true;
        }
        if let Some(allow) = self.allow_reconnect {
            config.allow_reconnect = Some(allow);
        }
        config.validate()
    }
}

/// Run the bridge until Ctrl-C
pub async fn run(config: Config, output: &Output) -> Result<()> {
    let table = Arc::new(MemoryTable::new());
    let remote = config.remote_address();
    if let Err(e) = table.initialize(&remote) {
        warn!(error = %e, "Table could not reach its remote; serving anyway");
    }

    let registry = Arc::new(SessionRegistry::with_queue_capacity(
        table.clone(),
        config.codec_config(),
        config.send_queue_capacity,
    ));

    let listener = TcpListener::bind(config.listen_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address()))?;
    let local_addr = listener.local_addr()?;

    info!(
        port = local_addr.port(),
        remote = %remote,
        format = config.format.as_str(),
        "Bridge started"
    );

    let resources = registry.static_resources();
    output.message(&format!(
        "Serving websocket on ws://{}{}",
        local_addr, WEBSOCKET_PATH
    ));
    output.message(&format!(
        "Client script: {} -> {}",
        resources.script_url(),
        resources.dir.join(resources.script_name()).display()
    ));
    if !resources.script_supports(config.format) {
        warn!(
            format = config.format.as_str(),
            "Bundled browser client only reads json; use a client that decodes this format"
        );
        output.message(&format!(
            "Note: {} speaks json only; {} clients need their own decoder",
            resources.script_url(),
            config.format.as_str()
        ));
    }
        if let Some(www) = &config.www_dir {
        output.message(&format!("Dashboard directory: {}", www.display()));
    }

    let closed = serve(listener, Arc::clone(&registry), shutdown_signal()).await;
    table.shutdown();
    info!(sessions = closed, "Bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Accept connections until `shutdown` completes, then close every session.
/// Returns the number of sessions closed.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    shutdown: impl Future<Output = ()>,
) -> usize {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(stream, peer, Arc::clone(&registry)));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    registry.shutdown().await
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, registry: Arc<SessionRegistry>) {
    match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => {
            let handle = registry.on_connection_established(ws);
            info!(session = %handle.id(), %peer, "Client connected");
        }
        Err(e) => debug!(%peer, error = %e, "Websocket handshake rejected"),
    }
}

/// Only upgrade requests for the bridge route
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    let path = request.uri().path();
    if path == WEBSOCKET_PATH {
        return Ok(response);
    }

    let mut rejection = ErrorResponse::new(Some(format!("No websocket at {}", path)));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use nt2ws_core::{CodecConfig, Value};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        let args = ServeArgs {
            port: Some(5810),
            team: Some(1418),
            format: Some(WireFormat::Cbor),
            type_tags: true,
            ..ServeArgs::default()
        };
        args.apply(&mut config).unwrap();

        assert_eq!(config.port, 5810);
        assert_eq!(config.remote_address(), "roborio-1418-frc.local");
        assert_eq!(config.format, WireFormat::Cbor);
        assert!(config.type_tags);
        assert!(config.allow_reconnect());
    }

    #[test]
    fn test_robot_flag_replaces_configured_team() {
        let mut config = Config {
            team: Some(254),
            ..Config::default()
        };
        let args = ServeArgs {
            robot: Some("10.2.54.2".to_string()),
            ..ServeArgs::default()
        };
        args.apply(&mut config).unwrap();
        assert_eq!(config.remote_address(), "10.2.54.2");
    }

    #[tokio::test]
    async fn test_serves_bridge_route_only() {
        let table = Arc::new(MemoryTable::new());
        table.seed_remote("10.0.0.2", [("robot/enabled", Value::Boolean(false))]);
        table.initialize("10.0.0.2").unwrap();
        let registry = Arc::new(SessionRegistry::new(table, CodecConfig::json()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, Arc::clone(&registry), async move {
            let _ = stop_rx.await;
        }));

        let bad = tokio_tungstenite::connect_async(format!("ws://{}/elsewhere", addr)).await;
        assert!(bad.is_err());

        let (mut ws, _) =
            tokio_tungstenite::connect_async(format!("ws://{}{}", addr, WEBSOCKET_PATH))
                .await
                .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = first else {
            panic!("expected text frame");
        };
        let status: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(status, serde_json::json!({"r": true, "a": "10.0.0.2"}));

        stop_tx.send(()).unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed, 1);
    }
}
