//! Shared HTTP clients, one per base URL.
//!
//! Connections, DNS lookups and TLS sessions are reused across every backend
//! pointing at the same endpoint. Per-request timeouts are applied by the
//! caller, so the pooled client only carries connection level settings.

use crate::miniagent::error::BackendError;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    static ref HTTP_CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> =
        Mutex::new(HashMap::new());
}

/// Get or create a shared HTTP client for the given base URL.
pub fn get_http_client(base_url: &str) -> Result<reqwest::Client, BackendError> {
    let mut pool = HTTP_CLIENT_POOL.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(client) = pool.get(base_url) {
        return Ok(client.clone());
    }

    let client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| BackendError::Connection(format!("failed to build HTTP client: {}", e)))?;

    pool.insert(base_url.to_string(), client.clone());
    Ok(client)
}

