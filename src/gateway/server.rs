//! WebSocket Server für Mobile Clients

use super::{Gateway, InboundFrame};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Nimmt Verbindungen an, bis `shutdown` ausgelöst wird
///
/// Danach werden alle Sessions abgebaut und die Verbindungen geschlossen,
/// bevor die Funktion zurückkehrt.
pub async fn serve(gateway: Gateway, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    tracing::info!("Gateway listening on ws://{}", addr);
    let connections = TaskTracker::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                let gateway = gateway.clone();
                connections.spawn(async move {
                    if let Err(e) = handle_connection(gateway, stream, peer).await {
                        tracing::warn!(%peer, "Connection error: {:#}", e);
                    }
                });
            }
        }
    }

    gateway.shutdown().await;

    // Writer-Tasks schicken noch ihre Close-Frames
    connections.close();
    if tokio::time::timeout(CLOSE_FRAME_TIMEOUT, connections.wait())
        .await
        .is_err()
    {
        tracing::warn!(remaining = connections.len(), "Connections still open after shutdown");
    }
    Ok(())
}

async fn handle_connection(gateway: Gateway, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut writer, mut reader) = ws_stream.split();

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let handle = gateway.attach(inbound_rx, outbound_tx);
    tracing::info!(client_id = %handle.id, %peer, "WebSocket client connected");

    // Writer: alles was die Session sendet, geht als Text-Frame raus
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode server message: {}", e);
                    continue;
                }
            };
            if writer.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = writer.send(Message::Close(None)).await;
    });

    let cancel = handle.cancel.clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(InboundFrame::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if inbound_tx.send(InboundFrame::Binary(data)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(client_id = %handle.id, close = ?frame, "Client sent close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client_id = %handle.id, "WebSocket read error: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    // Kanal schließen, die Session baut sich ab und beendet danach den Writer
    drop(inbound_tx);
    if let Err(e) = handle.task.await {
        tracing::error!(client_id = %handle.id, "Client session task failed: {}", e);
    }
    let _ = writer_task.await;
    tracing::info!(client_id = %handle.id, %peer, "WebSocket client disconnected");
    Ok(())
}
