//! 実行時ポリシー設定
//!
//! リクエスト受付の判定に使う設定値（プレフィックス、クールダウン、各種制限）を管理する。
//! DBのsettingsテーブルにJSONで保存される。
//!
//! 1件のコマンド判定は `SettingsHandle::snapshot()` で取得した同一スナップショットで行い、
//! 判定中に設定が差し替わっても途中で値が混ざらないようにする。

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::db::models::Setting;

/// settingsテーブルのキー
const RUNTIME_CONFIG_KEY: &str = "runtime_config";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("DB error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// リクエスト受付ポリシー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// コマンドのプレフィックス（例: "!"）
    pub prefix: String,
    /// コマンド名（例: "queue"）。空白を含められない
    pub command_name: String,
    /// 同一ユーザーのリクエスト間隔（秒）
    pub rate_limit_seconds: u64,
    /// `watch?v=` 形式のURLを受け付けるか
    pub allow_full_urls: bool,
    /// メンバーシップ加入者のみ受け付けるか
    pub require_membership: bool,
    /// スパチャのみ受け付けるか
    pub require_superchat: bool,
    /// スパチャの最低金額（USD換算）
    #[serde(rename = "minimumSuperchatUSD")]
    pub minimum_superchat_usd: f64,
    /// ホワイトリストのユーザーのみ受け付けるか
    pub enforce_user_whitelist: bool,
    /// ホワイトリストの動画のみ受け付けるか
    pub enforce_video_whitelist: bool,
    /// 再生済みの曲をキューから自動削除するか
    pub auto_remove_finished: bool,
    /// BAN動画をリクエストしたユーザーを自動BANするか
    pub auto_ban_on_banned_request: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            command_name: "queue".to_string(),
            rate_limit_seconds: 3000,
            allow_full_urls: false,
            require_membership: false,
            require_superchat: false,
            minimum_superchat_usd: 3.0,
            enforce_user_whitelist: false,
            enforce_video_whitelist: false,
            auto_remove_finished: true,
            auto_ban_on_banned_request: false,
        }
    }
}

impl RuntimeConfig {
    /// コマンドトークン（プレフィックス + コマンド名）
    pub fn command_token(&self) -> String {
        format!("{}{}", self.prefix, self.command_name)
    }

    /// 設定値の妥当性を検証
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.prefix.is_empty() {
            return Err(SettingsError::Invalid("prefix cannot be empty".to_string()));
        }
        if self.prefix.chars().any(char::is_whitespace) {
            return Err(SettingsError::Invalid(
                "prefix cannot contain whitespace".to_string(),
            ));
        }
        if self.command_name.is_empty() {
            return Err(SettingsError::Invalid("command name cannot be empty".to_string()));
        }
        if self.command_name.chars().any(char::is_whitespace) {
            return Err(SettingsError::Invalid(
                "command name cannot contain whitespace".to_string(),
            ));
        }
        if !self.minimum_superchat_usd.is_finite() || self.minimum_superchat_usd < 0.0 {
            return Err(SettingsError::Invalid(format!(
                "minimum superchat must be a non-negative number, got {}",
                self.minimum_superchat_usd
            )));
        }
        Ok(())
    }
}

/// スレッドセーフな設定ハンドル
///
/// 読み取りは `Arc` のクローンのみで、判定中にロックを保持しない。
/// 差し替えと保存は `lock_updates()` のガードを保持して行う。
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<RuntimeConfig>>>,
    updates: Arc<Mutex<()>>,
}

impl SettingsHandle {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            updates: Arc::new(Mutex::new(())),
        }
    }

    /// 設定更新（差し替え・保存・通知）を直列化するロック
    pub async fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.updates.lock().await
    }

    /// 現在の設定のスナップショットを取得
    pub fn snapshot(&self) -> Arc<RuntimeConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => {
                log::error!("Settings lock is poisoned, using last value");
                Arc::clone(&poisoned.into_inner())
            }
        }
    }

    /// 設定を丸ごと差し替える
    pub fn replace(&self, config: RuntimeConfig) -> Result<(), SettingsError> {
        config.validate()?;
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(config);
        Ok(())
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// 設定をDBから読み込む（未保存ならデフォルト）
pub async fn load_runtime_config(pool: &SqlitePool) -> Result<RuntimeConfig, SettingsError> {
    let result: Option<Setting> =
        sqlx::query_as("SELECT key, value, updated_at FROM settings WHERE key = ?")
            .bind(RUNTIME_CONFIG_KEY)
            .fetch_optional(pool)
            .await?;

    match result {
        Some(setting) => {
            log::debug!("Runtime config last updated at {}", setting.updated_at);
            let config: RuntimeConfig = serde_json::from_str(&setting.value)?;
            config.validate()?;
            Ok(config)
        }
        None => {
            log::info!("No runtime config stored yet, using defaults");
            Ok(RuntimeConfig::default())
        }
    }
}

/// 設定をDBに保存
pub async fn save_runtime_config(
    pool: &SqlitePool,
    config: &RuntimeConfig,
) -> Result<(), SettingsError> {
    config.validate()?;
    let now = chrono::Utc::now().to_rfc3339();
    let json_str = serde_json::to_string(config)?;

    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(RUNTIME_CONFIG_KEY)
    .bind(&json_str)
    .bind(&now)
    .execute(pool)
    .await?;

    log::info!("Runtime config saved");
    Ok(())
}
