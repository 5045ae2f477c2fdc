// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::GithubConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &GithubConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Shorten a response body for log and error messages.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
