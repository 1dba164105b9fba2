use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Row in the `user_data` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DataItem {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for creating a data item.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDataItem {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 500))]
    pub message: Option<String>,
}
