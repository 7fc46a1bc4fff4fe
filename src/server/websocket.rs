use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use super::types::{ClientMessage, ModerationListPayload, ServerState, WsMessage};
use crate::moderation::{ModerationChange, ModerationList, ModerationStore};
use crate::playback::{EngineError, QueueController, QueueEntry};
use crate::resolver::VideoResolver;
use crate::settings::{save_runtime_config, SettingsHandle};
use crate::shutdown::Shutdown;

type Tx = mpsc::UnboundedSender<Message>;
type PeerMap = Arc<RwLock<HashMap<usize, Tx>>>;

/// WebSocket接続管理状態
pub struct WebSocketState {
    peers: PeerMap,
    next_peer_id: AtomicUsize,
}

impl WebSocketState {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            next_peer_id: AtomicUsize::new(0),
        }
    }

    /// 新しいピアIDを取得
    pub fn next_id(&self) -> usize {
        self.next_peer_id.fetch_add(1, Ordering::SeqCst)
    }

    /// ピアを追加
    pub async fn add_peer(&self, peer_id: usize, tx: Tx) {
        let mut peers = self.peers.write().await;
        peers.insert(peer_id, tx);
        log::info!("WebSocket peer {} connected. Total peers: {}", peer_id, peers.len());
    }

    /// ピアを削除
    pub async fn remove_peer(&self, peer_id: usize) {
        let mut peers = self.peers.write().await;
        peers.remove(&peer_id);
        log::info!("WebSocket peer {} disconnected. Total peers: {}", peer_id, peers.len());
    }

    /// 全ピアにメッセージをブロードキャスト
    pub async fn broadcast(&self, message: WsMessage) {
        let Some(msg) = encode(&message) else {
            return;
        };

        let peers = self.peers.read().await;
        for (peer_id, tx) in peers.iter() {
            if let Err(e) = tx.send(msg.clone()) {
                log::warn!("Failed to send message to peer {}: {}", peer_id, e);
            }
        }

        log::debug!("Broadcasted message to {} peers: {:?}", peers.len(), message);
    }

    /// 1つのピアにだけ送信
    pub async fn send_to(&self, peer_id: usize, message: WsMessage) {
        let Some(msg) = encode(&message) else {
            return;
        };

        let peers = self.peers.read().await;
        match peers.get(&peer_id) {
            Some(tx) => {
                if let Err(e) = tx.send(msg) {
                    log::warn!("Failed to send message to peer {}: {}", peer_id, e);
                }
            }
            None => log::debug!("Peer {} is gone, dropping reply", peer_id),
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(message: &WsMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            log::error!("Failed to serialize WebSocket message: {}", e);
            None
        }
    }
}

/// モデレーター操作で触るサービス
pub struct ControlContext {
    pub moderation: Arc<ModerationStore>,
    pub settings: SettingsHandle,
    pub pool: SqlitePool,
    pub controller: Arc<QueueController>,
    pub resolver: Arc<dyn VideoResolver>,
}

fn moderation_update(moderation: &ModerationStore, list: ModerationList) -> WsMessage {
    WsMessage::ModerationUpdate {
        payload: ModerationListPayload {
            list,
            entries: moderation.list(list),
        },
    }
}

/// 再生操作の後に全ピアへ再生状態を通知する
async fn broadcast_player(
    ctx: &ControlContext,
    state: &ServerState,
    result: Result<(), EngineError>,
) -> Option<WsMessage> {
    if let Err(e) = result {
        log::warn!("Player control failed: {}", e);
        return Some(WsMessage::error(e.to_string()));
    }
    match ctx.controller.now_playing().await {
        Ok(payload) => {
            state
                .read()
                .await
                .broadcast(WsMessage::PlayerUpdate { payload })
                .await;
            None
        }
        Err(e) => Some(WsMessage::error(e.to_string())),
    }
}

/// クライアントからのメッセージを処理
///
/// 変更は全ピアにブロードキャストし、取得要求の応答は戻り値で送信元にだけ返す。
/// モデレーションリストの変更は `run_moderation_broadcaster` が通知する。
pub async fn dispatch(
    ctx: &ControlContext,
    state: &ServerState,
    message: ClientMessage,
) -> Option<WsMessage> {
    match message {
        ClientMessage::ModerationAdd { payload } => {
            let list = payload.list;
            let added = ctx
                .moderation
                .add_with_backfill(list, &payload.id, Arc::clone(&ctx.resolver))
                .await
                .is_some();
            if !added {
                return Some(moderation_update(&ctx.moderation, list));
            }
            log::info!("Moderator added {} to {}", payload.id.trim(), list.as_str());
            None
        }
        ClientMessage::ModerationRemove { payload } => {
            let list = payload.list;
            if !ctx.moderation.remove(list, &payload.id).await {
                return Some(moderation_update(&ctx.moderation, list));
            }
            log::info!("Moderator removed {} from {}", payload.id, list.as_str());
            None
        }
        ClientMessage::ModerationList { payload } => {
            Some(moderation_update(&ctx.moderation, payload.list))
        }
        ClientMessage::ConfigGet => Some(WsMessage::ConfigUpdate {
            payload: (*ctx.settings.snapshot()).clone(),
        }),
        ClientMessage::ConfigUpdate { payload } => {
            // 差し替え・保存・通知を同じ順序で行う
            let _update = ctx.settings.lock_updates().await;
            if let Err(e) = ctx.settings.replace(payload.clone()) {
                log::warn!("Rejected config update: {}", e);
                return Some(WsMessage::error(e.to_string()));
            }
            // 保存に失敗してもメモリ上の設定を使い続ける
            if let Err(e) = save_runtime_config(&ctx.pool, &payload).await {
                log::error!("Failed to persist runtime config: {}", e);
            }
            log::info!("Runtime config updated");
            state
                .read()
                .await
                .broadcast(WsMessage::ConfigUpdate { payload })
                .await;
            None
        }
        ClientMessage::QueueGet => Some(WsMessage::QueueUpdate {
            payload: ctx.controller.snapshot().await,
        }),
        ClientMessage::PlayerToggle => {
            let result = ctx.controller.toggle_pause().await.map(|_| ());
            broadcast_player(ctx, state, result).await
        }
        ClientMessage::PlayerNext => {
            let result = ctx.controller.skip().await.map(|_| ());
            broadcast_player(ctx, state, result).await
        }
        ClientMessage::PlayerPrevious => {
            let result = ctx.controller.previous().await.map(|_| ());
            broadcast_player(ctx, state, result).await
        }
        ClientMessage::PlayerVolume { payload } => {
            let result = ctx.controller.set_volume(payload.volume).await;
            broadcast_player(ctx, state, result).await
        }
        ClientMessage::PlayerGet => match ctx.controller.now_playing().await {
            Ok(payload) => Some(WsMessage::PlayerUpdate { payload }),
            Err(e) => Some(WsMessage::error(e.to_string())),
        },
    }
}

/// キューの変更を全ピアに転送
pub async fn run_queue_broadcaster(
    state: ServerState,
    mut updates: broadcast::Receiver<Vec<QueueEntry>>,
    mut shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(entries) => {
                    state
                        .read()
                        .await
                        .broadcast(WsMessage::QueueUpdate { payload: entries })
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Queue broadcaster lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.wait() => break,
        }
    }
    log::debug!("Queue broadcaster ended");
}

/// モデレーションリストの変更（モデレーター操作・自動BAN・表示名の取得）を全ピアに転送
pub async fn run_moderation_broadcaster(
    state: ServerState,
    mut changes: broadcast::Receiver<ModerationChange>,
    mut shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(ModerationChange { list, entries }) => {
                    state
                        .read()
                        .await
                        .broadcast(WsMessage::ModerationUpdate {
                            payload: ModerationListPayload { list, entries },
                        })
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Moderation broadcaster lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.wait() => break,
        }
    }
    log::debug!("Moderation broadcaster ended");
}

/// WebSocketサーバーを起動
///
/// 終了シグナルを受けると新規接続の受付を止めて戻る。
pub async fn start_websocket_server(
    addr: SocketAddr,
    state: ServerState,
    ctx: Arc<ControlContext>,
    mut shutdown: Shutdown,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("WebSocket server listening on ws://{}/ws", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    log::info!("New WebSocket connection from: {}", peer_addr);
                    tokio::spawn(handle_connection(
                        Arc::clone(&state),
                        Arc::clone(&ctx),
                        stream,
                        shutdown.clone(),
                    ));
                }
                Err(e) => log::warn!("Failed to accept connection: {}", e),
            },
            _ = shutdown.wait() => break,
        }
    }

    log::info!("WebSocket server stopped");
    Ok(())
}

/// WebSocket接続を処理
async fn handle_connection(
    state: ServerState,
    ctx: Arc<ControlContext>,
    stream: TcpStream,
    mut shutdown: Shutdown,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    log::info!("WebSocket handshake completed");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // ピアIDを取得して登録
    let peer_id = state.read().await.next_id();
    state.read().await.add_peer(peer_id, tx).await;

    // 送信タスク: チャネルからメッセージを受信してWebSocketに送信
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // 受信タスク: クライアントからの操作を処理
    let recv_state = Arc::clone(&state);
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("WebSocket error from peer {}: {}", peer_id, e);
                    break;
                }
            };
            if msg.is_close() {
                log::info!("Peer {} sent close frame", peer_id);
                break;
            }
            let Ok(text) = msg.to_text() else {
                continue;
            };
            if text.is_empty() {
                continue;
            }

            let reply = match serde_json::from_str::<ClientMessage>(text) {
                Ok(message) => dispatch(&ctx, &recv_state, message).await,
                Err(e) => {
                    log::warn!("Invalid message from peer {}: {}", peer_id, e);
                    Some(WsMessage::error(format!("invalid message: {}", e)))
                }
            };
            if let Some(reply) = reply {
                recv_state.read().await.send_to(peer_id, reply).await;
            }
        }
    });

    // どちらかのタスクが終了するか、終了シグナルまで待機
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
        _ = shutdown.wait() => {},
    }

    // 接続終了時にピアを削除
    {
        let state_lock = state.read().await;
        state_lock.remove_peer(peer_id).await;
    }

    log::info!("WebSocket connection closed for peer {}", peer_id);
}
