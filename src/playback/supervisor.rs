//! 再生を維持するバックグラウンドループ

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{EngineEvent, QueueController};
use crate::config::supervisor_tick;
use crate::shutdown::Shutdown;

/// 1秒ごとに再生状態を確認し、終わっていれば再開する
pub async fn run_supervisor(controller: Arc<QueueController>, mut shutdown: Shutdown) {
    log::info!("Playback supervisor started");

    while !shutdown.is_triggered() {
        if controller.supervisor_tick().await {
            log::debug!("Supervisor resumed playback");
        }

        if !shutdown.sleep(supervisor_tick()).await {
            break;
        }
    }

    log::info!("Playback supervisor stopped");
}

/// エンジンの曲送りイベントを受けて再生済みの曲を削除する
pub async fn run_track_advance_listener(
    controller: Arc<QueueController>,
    mut events: broadcast::Receiver<EngineEvent>,
    mut shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::TrackAdvanced) => {
                    if let Err(e) = controller.on_track_advance().await {
                        log::warn!("Failed to remove finished track: {}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Track advance listener lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.wait() => break,
        }
    }

    log::info!("Track advance listener stopped");
}

#[cfg(test)]
mod tests {
    use super::super::controller::test_support::*;
    use super::*;
    use crate::playback::{PlaybackEngine, PlayerState};
    use crate::settings::SettingsHandle;
    use crate::shutdown;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_removes_on_advance_and_stops_on_shutdown() {
        let engine = Arc::new(FakeEngine::new());
        let controller = Arc::new(QueueController::new(
            engine.clone(),
            Arc::new(FakeResolver::default()),
            SettingsHandle::default(),
        ));
        controller.enqueue("a", &requester("alice")).await.unwrap();
        controller.enqueue("b", &requester("bob")).await.unwrap();

        let (trigger, shutdown) = shutdown::channel();
        let mut updates = controller.subscribe();
        let handle = tokio::spawn(run_track_advance_listener(
            controller.clone(),
            engine.subscribe(),
            shutdown,
        ));

        engine.emit_advance();
        let queue = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(engine.titles(), vec!["Title b"]);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_loop_resumes_and_exits() {
        let engine = Arc::new(FakeEngine::new());
        let controller = Arc::new(QueueController::new(
            engine.clone(),
            Arc::new(FakeResolver::default()),
            SettingsHandle::default(),
        ));
        controller.enqueue("a", &requester("alice")).await.unwrap();
        engine.set_state(PlayerState::Ended);

        let (trigger, shutdown) = shutdown::channel();
        let handle = tokio::spawn(run_supervisor(controller, shutdown));

        // 最初のtickで再開される
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.state().await.unwrap(), PlayerState::Playing);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
