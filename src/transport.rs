//! # Line transport
//!
//! Pumps a [`LocalChannel`] over any byte stream using one JSON frame per
//! line. Inbound frames are delivered to the channel's listeners; everything
//! the channel emits is written out.
//!
//! With a session configured, the pump opens with a `connect` frame and the
//! channel only becomes connected once the peer answers `is-connected: true`.
//! Without one the channel is connected as soon as the pump starts. It is
//! disconnected again when the stream ends.

use std::{future::Future, sync::Arc};

use secrecy::ExposeSecret;
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::broadcast,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::SessionParams,
    event::{channel::LocalChannel, message::Message},
    notifications::IS_CONNECTED_EVENT,
    BridgeError, BridgeResult,
};

pub const CONNECT_EVENT: &str = "connect";

/// Handshake frame identifying the session, cookie and browser tab.
pub fn connect_message(session: &SessionParams) -> Message {
    Message::new(
        CONNECT_EVENT,
        json!({
            "id": session.id,
            "cookie": session.cookie.expose_secret(),
            "tabId": session.tab_id,
        }),
    )
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> BridgeResult<()> {
    let mut line = message.to_line()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn handle_line(channel: &LocalChannel, line: &[u8]) {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            warn!("Skipping frame that is not UTF-8: {}", e);
            return;
        }
    };
    if line.trim().is_empty() {
        return;
    }
    let message = match Message::from_line(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("Skipping malformed frame: {}", e);
            return;
        }
    };
    if message.event == IS_CONNECTED_EVENT {
        if let Some(connected) = message.payload.as_bool() {
            channel.set_connected(connected);
        }
    }
    debug!("Received {}", message.event);
    channel.deliver(&message);
}

/// Runs the pump until the reader reaches EOF or an IO error occurs.
pub async fn serve_io<R, W>(
    channel: Arc<LocalChannel>,
    reader: R,
    mut writer: W,
    session: Option<SessionParams>,
) -> BridgeResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).split(b'\n');
    let mut outbound = channel.outbound();

    match &session {
        Some(session) => {
            debug!("Opening session {} (tab {})", session.id, session.tab_id);
            write_frame(&mut writer, &connect_message(session)).await?;
        }
        None => channel.set_connected(true),
    }

    let result = loop {
        tokio::select! {
            line = lines.next_segment() => match line {
                Ok(Some(line)) => handle_line(&channel, &line),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            },
            message = outbound.recv() => match message {
                Ok(message) => {
                    if let Err(e) = write_frame(&mut writer, &message).await {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Transport lagged, {} outbound message(s) lost", count);
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
        }
    };

    channel.set_connected(false);
    info!("Transport closed");
    result
}

/// Connects to `addr` over TCP and spawns the pump.
pub async fn connect_tcp(
    addr: &str,
    channel: Arc<LocalChannel>,
    session: Option<SessionParams>,
) -> BridgeResult<JoinHandle<BridgeResult<()>>> {
    let stream = TcpStream::connect(addr).await?;
    info!("Connected to {}", addr);
    let (reader, writer) = stream.into_split();
    Ok(tokio::spawn(serve_io(channel, reader, writer, session)))
}

/// Drives `work` while the pump is running. Fails with `Disconnected` if the
/// pump stops first.
pub async fn while_open<T, F>(pump: &mut JoinHandle<BridgeResult<()>>, work: F) -> BridgeResult<T>
where
    F: Future<Output = BridgeResult<T>>,
{
    tokio::select! {
        result = work => result,
        finished = pump => {
            if let Ok(Err(e)) = finished {
                warn!("Transport failed: {}", e);
            }
            Err(BridgeError::Disconnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SessionConfig, event::channel::Channel};
    use serde_json::Value;
    use tokio::io::{duplex, split};

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let channel = Arc::new(LocalChannel::new(8));
        let (client, server) = duplex(1024);
        let (client_read, client_write) = split(client);
        let pump = tokio::spawn(serve_io(channel.clone(), client_read, client_write, None));

        channel.wait_connected().await.unwrap();

        let (received_tx, mut received_rx) = tokio::sync::mpsc::unbounded_channel();
        channel.on(
            "design-created",
            Arc::new(move |payload: &Value| {
                let _ = received_tx.send(payload.clone());
            }),
        );
        channel
            .emit(Message::new("create-design", json!({"name": "A"})))
            .unwrap();

        let (server_read, mut server_write) = split(server);
        let mut server_lines = BufReader::new(server_read).lines();
        let line = server_lines.next_line().await.unwrap().unwrap();
        assert_eq!(
            Message::from_line(&line).unwrap(),
            Message::new("create-design", json!({"name": "A"}))
        );

        server_write
            .write_all(b"not json\n{\"event\":\"design-created\",\"payload\":{\"nodes\":[]}}\n")
            .await
            .unwrap();
        assert_eq!(received_rx.recv().await.unwrap(), json!({"nodes": []}));

        drop(server_write);
        drop(server_lines);
        pump.await.unwrap().unwrap();
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let channel = Arc::new(LocalChannel::new(8));
        let (client, server) = duplex(1024);
        let (client_read, client_write) = split(client);
        let pump = tokio::spawn(serve_io(channel.clone(), client_read, client_write, None));
        channel.wait_connected().await.unwrap();

        let (received_tx, mut received_rx) = tokio::sync::mpsc::unbounded_channel();
        channel.on(
            "design-created",
            Arc::new(move |payload: &Value| {
                let _ = received_tx.send(payload.clone());
            }),
        );

        let (server_read, mut server_write) = split(server);
        server_write
            .write_all(b"\xff\xfe garbage\n{\"event\":\"design-created\",\"payload\":1}\r\n")
            .await
            .unwrap();

        assert_eq!(received_rx.recv().await.unwrap(), json!(1));
        assert!(channel.is_connected());

        drop(server_write);
        drop(server_read);
        pump.await.unwrap().unwrap();
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_while_open_fails_when_peer_hangs_up() {
        let channel = Arc::new(LocalChannel::new(8));
        let (client, server) = duplex(1024);
        let (client_read, client_write) = split(client);
        let mut pump = tokio::spawn(serve_io(channel.clone(), client_read, client_write, None));
        channel.wait_connected().await.unwrap();

        drop(server);
        let result: BridgeResult<()> = while_open(&mut pump, std::future::pending()).await;

        assert!(matches!(result, Err(BridgeError::Disconnected)));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_session_handshake() {
        let channel = Arc::new(LocalChannel::new(8));
        let session = SessionParams::from(SessionConfig {
            id: "s1".to_string(),
            cookie: "c00kie".to_string(),
            tab_id: "3".to_string(),
        });
        let (client, server) = duplex(1024);
        let (client_read, client_write) = split(client);
        let pump = tokio::spawn(serve_io(
            channel.clone(),
            client_read,
            client_write,
            Some(session),
        ));

        let (server_read, mut server_write) = split(server);
        let mut server_lines = BufReader::new(server_read).lines();
        let line = server_lines.next_line().await.unwrap().unwrap();
        let connect = Message::from_line(&line).unwrap();
        assert_eq!(connect.event, CONNECT_EVENT);
        assert_eq!(
            connect.payload,
            json!({"id": "s1", "cookie": "c00kie", "tabId": "3"})
        );
        assert!(!channel.is_connected());

        server_write
            .write_all(b"{\"event\":\"is-connected\",\"payload\":true}\n")
            .await
            .unwrap();
        channel.wait_connected().await.unwrap();

        drop(server_write);
        drop(server_lines);
        pump.await.unwrap().unwrap();
        assert!(!channel.is_connected());
    }
}
