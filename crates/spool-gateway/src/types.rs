use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body for the tier counter endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct AmountRequest {
    pub amount_gb: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub account_type: String,
    pub file_size_gb: u64,
}

/// Reported after a file has been uploaded
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordFileRequest {
    pub file_name: String,
    pub file_size_gb: u64,
    pub uploader_address: String,
    pub tier: String,
    pub hosts: Vec<Vec<String>>,
    pub shards: Option<u32>,
    pub backup_shards: Option<u32>,
    pub timezone: Option<String>,
    pub upload_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub address: String,
    pub account_type: String,
    pub user_name: Option<String>,
    pub relay_address: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub field_name: String,
    pub field_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub tier: String,
    pub file_size_gb: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SampleQuery {
    pub amount: usize,
}
