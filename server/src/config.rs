//! Broker configuration

use anyhow::{Context, Result};
use std::env;

/// Broker configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Base URL the join link is built from.
    pub frontend_base_url: String,
    /// Room lifetime in seconds (default: 24 hours).
    pub room_ttl_seconds: u64,
    /// Period of the expiry/prune sweep in milliseconds.
    pub cleanup_interval_ms: u64,
    /// Maximum accepted JSON body size in bytes.
    pub max_json_body_bytes: usize,
    /// REST rate-limit window in milliseconds.
    pub rest_rate_limit_window_ms: u64,
    /// REST requests allowed per window per IP.
    pub rest_rate_limit_max: u32,
    /// WebSocket-upgrade rate-limit window in milliseconds.
    pub ws_rate_limit_window_ms: u64,
    /// Upgrades allowed per window per IP.
    pub ws_rate_limit_max: u32,
    /// Relay (TURN) server URLs handed to peers.
    pub turn_urls: Vec<String>,
    /// Shared secret for minting relay credentials (None = pass-through).
    pub turn_shared_secret: Option<String>,
    /// Relay credential lifetime in seconds.
    pub turn_ttl_seconds: u64,
    /// Allowed CORS origins (empty = permissive).
    pub cors_origins: Vec<String>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl BrokerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = BrokerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8787".to_string())
                .parse()
                .context("Invalid PORT")?,
            frontend_base_url: env::var("FRONTEND_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            room_ttl_seconds: env::var("ROOM_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid ROOM_TTL_SECONDS")?,
            cleanup_interval_ms: env::var("CLEANUP_INTERVAL_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .context("Invalid CLEANUP_INTERVAL_MS")?,
            max_json_body_bytes: env::var("MAX_JSON_BODY_BYTES")
                .unwrap_or_else(|_| "16384".to_string())
                .parse()
                .context("Invalid MAX_JSON_BODY_BYTES")?,
            rest_rate_limit_window_ms: env::var("REST_RATE_LIMIT_WINDOW_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .context("Invalid REST_RATE_LIMIT_WINDOW_MS")?,
            rest_rate_limit_max: env::var("REST_RATE_LIMIT_MAX")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid REST_RATE_LIMIT_MAX")?,
            ws_rate_limit_window_ms: env::var("WS_RATE_LIMIT_WINDOW_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .context("Invalid WS_RATE_LIMIT_WINDOW_MS")?,
            ws_rate_limit_max: env::var("WS_RATE_LIMIT_MAX")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid WS_RATE_LIMIT_MAX")?,
            turn_urls: env::var("TURN_URLS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            turn_shared_secret: env::var("TURN_SHARED_SECRET")
                .ok()
                .filter(|secret| !secret.is_empty()),
            turn_ttl_seconds: env::var("TURN_TTL_SECONDS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("Invalid TURN_TTL_SECONDS")?,
            cors_origins: env::var("CORS_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
        };

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_list("turn:a.example.com:3478, turns:b.example.com:5349 ,,"),
            vec!["turn:a.example.com:3478", "turns:b.example.com:5349"]
        );
        assert!(split_list("").is_empty());
    }
}
