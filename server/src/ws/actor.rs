use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Instant};

use crate::chat::{ConnectionSession, Identity};
use crate::state::AppState;
use crate::ws::protocol;

/// Transport keepalive: the server pings every `ping_interval` so half-open
/// connections are detected, and tears the connection down if no pong
/// arrives within `pong_timeout` of a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// Wait until a pong newer than `ping_sent` has been seen.
/// Pongs received before the ping do not count.
async fn await_pong(
    last_pong: &mut watch::Receiver<Instant>,
    ping_sent: Instant,
    wait: Duration,
) -> bool {
    matches!(
        timeout(wait, last_pong.wait_for(|seen| *seen >= ping_sent)).await,
        Ok(Ok(_))
    )
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Keepalive task: pings and returns once the peer stops answering
/// - Reader loop: decodes client frames and dispatches them one at a time,
///   and stops as soon as the keepalive task gives up
///
/// The session owns the channel sender; the identity directory only keeps a
/// weak handle, so once this function returns (or its future is dropped)
/// nothing can push to the connection anymore.
pub async fn run_connection(socket: WebSocket, state: AppState, authenticated: Identity) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let mut session = ConnectionSession::open(authenticated.clone(), tx, state.directory.clone());
    let session_id = session.id();

    tracing::info!(
        user_id = %authenticated,
        session_id = %session_id,
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, pong_rx) = watch::channel(Instant::now());
    let mut keepalive_handle = tokio::spawn(keepalive_task(
        session.sender().downgrade(),
        pong_rx,
        state.keepalive,
    ));

    // Reader loop: frames are handled sequentially, which also keeps a
    // session's sends in order
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = &mut keepalive_handle => {
                tracing::info!(
                    user_id = %authenticated,
                    session_id = %session_id,
                    "Keepalive ended, dropping connection"
                );
                break;
            }
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &mut session, &state).await;
                }
                Message::Binary(_) => {
                    protocol::send_error(
                        session.sender(),
                        protocol::ERROR_BAD_REQUEST,
                        "Binary frames are not supported",
                    );
                }
                Message::Pong(_) => {
                    pong_tx.send_replace(Instant::now());
                }
                Message::Ping(data) => {
                    let _ = session.sender().send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %authenticated,
                        session_id = %session_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %authenticated,
                    session_id = %session_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(
                    user_id = %authenticated,
                    session_id = %session_id,
                    "WebSocket stream ended"
                );
                break;
            }
        }
    }

    // Deregister first so no new pushes target this session
    session.close();

    writer_handle.abort();
    keepalive_handle.abort();

    tracing::info!(
        user_id = %authenticated,
        session_id = %session_id,
        "WebSocket actor stopped"
    );
}

/// Keepalive task: pings on every interval and returns when a pong is
/// overdue or the connection is already gone.
async fn keepalive_task(
    tx: mpsc::WeakUnboundedSender<Message>,
    mut last_pong: watch::Receiver<Instant>,
    keepalive: Keepalive,
) {
    let mut ping_timer = interval(keepalive.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        let Some(sender) = tx.upgrade() else {
            return;
        };
        let ping_sent = Instant::now();
        if sender.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            return;
        }
        drop(sender);

        if !await_pong(&mut last_pong, ping_sent, keepalive.pong_timeout).await {
            tracing::warn!("Pong timeout, closing connection");
            if let Some(sender) = tx.upgrade() {
                let _ = sender.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
            }
            return;
        }
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}
