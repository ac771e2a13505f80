use serde::{Deserialize, Serialize};

use crate::config::ScannerFlags;

#[derive(Deserialize)]
pub struct CreateScanRequest {
    pub usuario_id: String,
    pub alias: Option<String>,
    pub url: String,
    #[serde(default)]
    pub flags: ScannerFlags,
}

#[derive(Serialize)]
pub struct ScanResponse {
    pub id: String,
    pub estado: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
