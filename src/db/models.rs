use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 設定モデル
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

/// モデレーションリストの1行
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRow {
    pub list_name: String,
    pub entry_id: String,
    pub display_name: String,
    pub position: i64,
    pub updated_at: String,
}
