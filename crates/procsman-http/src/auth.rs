//! `auth.key` handling and the authentication middleware.
//!
//! The key is 64 random bytes, stored base64 in `auth.key` (mode 0600),
//! generated on first run. Requests present the base64 key in
//! `X-Auth-Key`; its SHA-256 must match the stored key's hash.

use crate::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tracing::info;

/// The expected key, kept only as a hash.
pub struct AuthKey {
    expected_hash: [u8; 32],
}

impl AuthKey {
    /// Load `auth.key`, generating a fresh key on first run.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        let encoded = match std::fs::read_to_string(path) {
            Ok(raw) => raw.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut key = [0u8; 64];
                rand::thread_rng().fill_bytes(&mut key);
                let encoded = BASE64.encode(key);
                std::fs::write(path, &encoded)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
                }
                info!("generated new auth key: {}", encoded);
                encoded
            }
            Err(e) => return Err(e),
        };

        let key = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self {
            expected_hash: Sha256::digest(&key).into(),
        })
    }

    /// Verify a presented base64 key. Hash comparison is constant-time.
    pub fn verify(&self, presented: &str) -> bool {
        let Ok(key) = BASE64.decode(presented.trim().as_bytes()) else {
            return false;
        };
        let hash: [u8; 32] = Sha256::digest(&key).into();
        constant_time_eq(&hash, &self.expected_hash)
    }
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Reject requests without a valid `X-Auth-Key`.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("X-Auth-Key")
        .and_then(|v| v.to_str().ok());
    match presented {
        None => (StatusCode::UNAUTHORIZED, "Missing authorization").into_response(),
        Some(key) if !state.auth.verify(key) => {
            (StatusCode::UNAUTHORIZED, "Invalid authorization").into_response()
        }
        Some(_) => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_key_on_first_run_and_verifies_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.key");

        let auth = AuthKey::load_or_create(&path).unwrap();
        let stored = std::fs::read_to_string(&path).unwrap();
        assert!(auth.verify(&stored));
        assert!(!auth.verify("not-the-key"));
        assert!(!auth.verify(&BASE64.encode(b"wrong")));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn reload_accepts_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.key");

        let _ = AuthKey::load_or_create(&path).unwrap();
        let stored = std::fs::read_to_string(&path).unwrap();
        let reloaded = AuthKey::load_or_create(&path).unwrap();
        assert!(reloaded.verify(&stored));
    }

    #[test]
    fn garbage_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.key");
        std::fs::write(&path, "!!! not base64 !!!").unwrap();
        assert!(AuthKey::load_or_create(&path).is_err());
    }
}
