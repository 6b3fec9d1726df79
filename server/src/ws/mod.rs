pub mod actor;
pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;

/// Sender half of a WebSocket connection's outbound queue.
/// Anything that needs to push to a specific client clones (or holds a weak
/// handle to) this sender; the connection's writer task drains it.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
