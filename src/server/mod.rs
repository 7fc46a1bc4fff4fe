pub mod types;
mod websocket;

pub use types::{ServerState, WsMessage};
pub use websocket::{
    run_moderation_broadcaster, run_queue_broadcaster, start_websocket_server, ControlContext,
};

use std::sync::Arc;
use tokio::sync::RwLock;

/// サーバー用の共有状態を作成
pub fn create_server_state() -> ServerState {
    Arc::new(RwLock::new(websocket::WebSocketState::new()))
}
