//! In-process WebSocket server and event helpers for async tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::model::Envelope;
use crate::network::TransportEvent;

const WAIT: Duration = Duration::from_secs(5);

/// Instructions for the server side of one connection.
#[derive(Debug)]
pub enum ServerCmd {
    Text(String),
    /// Drop the TCP stream without a close handshake.
    Drop,
    CloseNormal,
}

pub struct TestServer {
    pub url: String,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    accepted: Arc<AtomicUsize>,
    taken: usize,
}

/// Server end of one accepted connection. Dropping it drops the socket.
pub struct ServerConn {
    frames: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<ServerCmd>,
}

pub async fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let counter = counter.clone();

            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                let (push_tx, mut push_rx) = mpsc::unbounded_channel();

                counter.fetch_add(1, Ordering::SeqCst);
                if tx
                    .send(ServerConn {
                        frames: frames_rx,
                        push: push_tx,
                    })
                    .is_err()
                {
                    return;
                }

                let (mut write, mut read) = ws.split();
                loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = frames_tx.send(text.to_string());
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        cmd = push_rx.recv() => match cmd {
                            Some(ServerCmd::Text(text)) => {
                                if write.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerCmd::CloseNormal) => {
                                let frame = CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "server closing".into(),
                                };
                                let _ = write.send(Message::Close(Some(frame))).await;
                            }
                            Some(ServerCmd::Drop) | None => break,
                        }
                    }
                }
            });
        }
    });

    TestServer {
        url: format!("ws://{}", addr),
        conns: rx,
        accepted,
        taken: 0,
    }
}

impl TestServer {
    pub async fn accept(&mut self) -> ServerConn {
        let conn = tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("no connection within timeout")
            .expect("server task ended");
        self.taken += 1;
        conn
    }

    /// Connections accepted but not yet taken with [`TestServer::accept`].
    pub fn pending_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst) - self.taken
    }
}

impl ServerConn {
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame within timeout")
            .expect("connection closed")
    }

    pub async fn next_envelope(&mut self) -> Envelope {
        Envelope::parse(&self.next_frame().await).unwrap()
    }

    /// Collect frames until `quiet` passes without one.
    pub async fn drain(&mut self, quiet: Duration) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(quiet, self.frames.recv()).await {
            out.push(Envelope::parse(&frame).unwrap());
        }
        out
    }

    pub fn command(&self, cmd: ServerCmd) {
        let _ = self.push.send(cmd);
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.command(ServerCmd::Text(value.to_string()));
    }
}

pub async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no event within timeout")
        .expect("event channel closed")
}

pub async fn wait_for_event<F>(
    events: &mut mpsc::Receiver<TransportEvent>,
    mut predicate: F,
) -> TransportEvent
where
    F: FnMut(&TransportEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}
