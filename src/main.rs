//! Echo server entry point.
//!
//! Accepts WebSocket upgrades on `WS_LISTEN_ADDR` and echoes every message
//! back on the same session until Ctrl-C.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use ws_session_core::{Container, ContainerConfig, EndpointConfig, Handlers, Payload};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ContainerConfig::from_env();
    let listen_addr: SocketAddr = std::env::var("WS_LISTEN_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:9001".to_string())
        .parse()?;
    tracing::info!(addr = %listen_addr, ?config, "starting echo server");

    let container = Container::new(config);
    container.start()?;

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(%err, "tcp accept failed");
                        continue;
                    }
                };
                let container = container.clone();
                tokio::spawn(async move {
                    let config = EndpointConfig::new().with_sub_protocols(["echo", "chat"]);
                    match container.accept(echo(), config, stream).await {
                        Ok(session) => {
                            tracing::debug!(%peer, session_id = %session.id(), "session accepted");
                        }
                        Err(err) => tracing::warn!(%peer, %err, "upgrade failed"),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!(sessions = container.session_count(), "shutting down");
    container.stop().await;
    Ok(())
}

fn echo() -> Handlers {
    Handlers::new()
        .on_text(|session, text, last| async move {
            session.send(Payload::Text(text), last).await?;
            Ok(())
        })
        .on_binary(|session, data, last| async move {
            session.send(Payload::Binary(data), last).await?;
            Ok(())
        })
}
