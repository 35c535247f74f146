//! Short-lived relay (TURN) credentials
//!
//! Standard TURN REST scheme: the username carries the expiry and the peer
//! tag, the credential is `base64(HMAC-SHA1(secret, username))`. Without a
//! configured secret the broker passes the URLs through with empty
//! credentials.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;

use peerlink_shared::b64;
use peerlink_shared::validate::sanitize_peer_id;

/// Floor on the credential lifetime.
pub const MIN_TTL_SECONDS: u64 = 30;

/// Credentials a peer presents to the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCredentials {
    /// Relay server URLs.
    pub urls: Vec<String>,
    /// Expiring username, empty without a shared secret.
    pub username: String,
    /// HMAC credential, empty without a shared secret.
    pub credential: String,
    /// Credential lifetime in seconds.
    pub ttl_seconds: u64,
}

/// Mint credentials for `peer_id` valid `ttl_seconds` from `now_ms`.
pub fn build_turn_credentials(
    urls: &[String],
    shared_secret: Option<&str>,
    ttl_seconds: u64,
    peer_id: &str,
    now_ms: u64,
) -> TurnCredentials {
    let ttl = ttl_seconds.max(MIN_TTL_SECONDS);
    let Some(secret) = shared_secret.filter(|s| !s.is_empty()) else {
        return TurnCredentials {
            urls: urls.to_vec(),
            username: String::new(),
            credential: String::new(),
            ttl_seconds: ttl,
        };
    };

    let expiry = now_ms / 1_000 + ttl;
    let username = format!("{expiry}:{}", sanitize_peer_id(peer_id));

    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(username.as_bytes());
    let credential = b64::encode_std(&mac.finalize().into_bytes());

    TurnCredentials {
        urls: urls.to_vec(),
        username,
        credential,
        ttl_seconds: ttl,
    }
}
