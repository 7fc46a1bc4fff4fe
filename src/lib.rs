pub mod admission;
pub mod command;
pub mod config;
pub mod currency;
pub mod db;
pub mod ingest;
pub mod moderation;
pub mod playback;
pub mod ratelimit;
pub mod resolver;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod youtube;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use config::{AppConfig, ConfigError, PlayerBackend};
use currency::{CurrencyConverter, CurrencyError, RateTableConverter};
use ingest::{run_ingestion, CommandProcessor};
use moderation::{ModerationStore, SqliteListStore};
use playback::{
    run_supervisor, run_track_advance_listener, EngineError, MediaSink, NullSink, PlaybackEngine,
    PlaylistEngine, QueueController, SinkEvent,
};
use resolver::{ResolveError, VideoResolver, YtDlpResolver};
use server::{
    run_moderation_broadcaster, run_queue_broadcaster, start_websocket_server, ControlContext,
};
use settings::{load_runtime_config, SettingsError, SettingsHandle};
use youtube::{YouTubeChatSource, YouTubeClient, YouTubeError};

/// 起動時のエラー（起動後のエラーはログに残して処理を続ける）
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolveError),

    #[error("Currency error: {0}")]
    Currency(#[from] CurrencyError),

    #[error("YouTube error: {0}")]
    YouTube(#[from] YouTubeError),

    #[error("Player error: {0}")]
    Engine(#[from] EngineError),
}

/// 設定に応じた出力先を作成
async fn create_sink(
    config: &AppConfig,
    events: mpsc::UnboundedSender<SinkEvent>,
) -> Result<Arc<dyn MediaSink>, AppError> {
    let dry_run_length = Duration::from_secs(config.dry_run_track_secs);
    match config.player {
        #[cfg(unix)]
        PlayerBackend::Mpv => {
            let socket_path = config.data_dir.join("mpv.sock");
            let sink = playback::MpvSink::spawn(&config.mpv_path, socket_path, events).await?;
            Ok(Arc::new(sink))
        }
        #[cfg(not(unix))]
        PlayerBackend::Mpv => {
            log::warn!("mpv backend is only supported on unix, falling back to dry run");
            Ok(Arc::new(NullSink::new(dry_run_length, events)))
        }
        PlayerBackend::None => {
            log::info!("Dry run: tracks end after {:?}", dry_run_length);
            Ok(Arc::new(NullSink::new(dry_run_length, events)))
        }
    }
}

/// 全サービスを起動し、Ctrl-C で終了する
pub async fn run() -> Result<(), AppError> {
    match dotenvy::dotenv() {
        Ok(path) => log::info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("Failed to load .env: {}", e),
    }

    let config = AppConfig::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;
    log::info!("Data directory: {}", config.data_dir.display());

    let pool = db::create_pool(&config.db_path()).await?;
    let settings = SettingsHandle::new(load_runtime_config(&pool).await?);
    let moderation = Arc::new(
        ModerationStore::load(Arc::new(SqliteListStore::new(pool.clone()))).await,
    );

    let resolver: Arc<dyn VideoResolver> = Arc::new(YtDlpResolver::new(config.ytdlp_path.clone())?);
    let converter: Arc<dyn CurrencyConverter> =
        Arc::new(RateTableConverter::new(config.rates_url.clone())?);

    let (trigger, shutdown) = shutdown::channel();
    let mut tasks = Vec::new();

    // 再生
    let (sink_tx, sink_rx) = mpsc::unbounded_channel();
    let sink = create_sink(&config, sink_tx).await?;
    let engine = Arc::new(PlaylistEngine::new(sink));
    tasks.push(engine.spawn_sink_listener(sink_rx, shutdown.clone()));
    let engine_events = engine.subscribe();

    let controller = Arc::new(QueueController::new(
        engine,
        Arc::clone(&resolver),
        settings.clone(),
    ));
    tasks.push(tokio::spawn(run_supervisor(
        Arc::clone(&controller),
        shutdown.clone(),
    )));
    tasks.push(tokio::spawn(run_track_advance_listener(
        Arc::clone(&controller),
        engine_events,
        shutdown.clone(),
    )));

    // モデレーター操作・オーバーレイ配信
    let server_state = server::create_server_state();
    tasks.push(tokio::spawn(run_queue_broadcaster(
        Arc::clone(&server_state),
        controller.subscribe(),
        shutdown.clone(),
    )));
    tasks.push(tokio::spawn(run_moderation_broadcaster(
        Arc::clone(&server_state),
        moderation.subscribe(),
        shutdown.clone(),
    )));
    {
        let ctx = Arc::new(ControlContext {
            moderation: Arc::clone(&moderation),
            settings: settings.clone(),
            pool: pool.clone(),
            controller: Arc::clone(&controller),
            resolver: Arc::clone(&resolver),
        });
        let state = Arc::clone(&server_state);
        let addr = config.ws_addr;
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = start_websocket_server(addr, state, ctx, shutdown).await {
                log::error!("WebSocket server error: {}", e);
            }
        }));
    }

    // チャット取得
    let client = YouTubeClient::new(config.api_key.clone())?;
    let source = Box::new(YouTubeChatSource::new(client, config.video_id.clone()));
    let processor = Arc::new(CommandProcessor::new(
        settings,
        moderation,
        converter,
        controller,
    ));
    tasks.push(tokio::spawn(run_ingestion(source, processor, shutdown.clone())));

    log::info!("lyte is running for video {}", config.video_id);
    tokio::signal::ctrl_c().await?;

    log::info!("Shutting down");
    trigger.trigger();
    for task in tasks {
        if let Err(e) = task.await {
            log::warn!("Background task ended abnormally: {}", e);
        }
    }

    pool.close().await;
    log::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_sink_reports_finished_track() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::from_lookup(|key| match key {
            "LYTE_VIDEO_ID" => Some("vid".to_string()),
            "YOUTUBE_API_KEY" => Some("key".to_string()),
            "LYTE_DATA_DIR" => Some(dir.path().display().to_string()),
            "LYTE_PLAYER" => Some("none".to_string()),
            "LYTE_DRY_RUN_TRACK_SECS" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = create_sink(&config, tx).await.unwrap();
        sink.load(
            7,
            &playback::MediaItem {
                stream_url: "https://stream.example/a".to_string(),
                title: "a".to_string(),
            },
        )
        .await
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("dry run track should finish")
            .unwrap();
        assert!(matches!(event, SinkEvent::Finished { load_id: 7 }));
    }
}
