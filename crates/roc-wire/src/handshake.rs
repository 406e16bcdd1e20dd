//! Protocol-version exchange and HMAC client-authentication handshake,
//! both run once at connection startup before the send/receive loops.

use hmac::{Hmac, Mac};
use rand::RngCore;
use roc_core::error::{EngineError, Result};
use sha1::Sha1;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type HmacSha1 = Hmac<Sha1>;

/// A single-byte protocol version exchange. Returns the peer's byte on
/// success; a mismatch against `local_version` is a fatal error, not
/// something this function decides how to recover from — cross-version
/// compatibility is out of scope (spec.md §1 Non-goals).
pub async fn exchange_version<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    local_version: u8,
) -> Result<u8> {
    stream
        .write_u8(local_version)
        .await
        .map_err(|err| EngineError::io("handshake.version_write", err))?;
    stream
        .flush()
        .await
        .map_err(|err| EngineError::io("handshake.version_flush", err))?;
    let peer_version = stream
        .read_u8()
        .await
        .map_err(|err| EngineError::io("handshake.version_read", err))?;
    if peer_version != local_version {
        return Err(EngineError::version_mismatch(local_version, peer_version));
    }
    Ok(peer_version)
}

/// Looks up the shared secret registered for a client name. The loader
/// that populates a store (reading a file, calling a secrets manager) is
/// an external collaborator; this trait is the in-scope seam.
pub trait CredentialStore: Send + Sync {
    fn key_for(&self, name: &str) -> Option<Vec<u8>>;
}

/// Supplies the "now" used for timestamp-skew checking; a trait rather
/// than a bare `u64` so tests can inject a fixed clock.
pub trait AuthClock: Send + Sync {
    fn now_unix_seconds(&self) -> u64;
}

/// Reads the system clock each call.
pub struct SystemAuthClock;

impl AuthClock for SystemAuthClock {
    fn now_unix_seconds(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Runs the §4.3 handshake as the node (server) side. On success returns
/// the authenticated client's name; on any rejection reason (unknown
/// name, HMAC mismatch, timestamp skew) it still writes the reject byte
/// before returning `Err`, matching "Node sends one byte: 0 = ok, 1 =
/// rejected" unconditionally. I/O failures during any of the five steps
/// are reported as `Io`-category errors and the caller must close the
/// connection without attempting to write a status byte that may not
/// land anyway.
pub async fn perform_auth_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    credentials: &dyn CredentialStore,
    clock: &dyn AuthClock,
    skew_window: Duration,
) -> Result<String> {
    let mut ts_bytes = [0u8; 8];
    stream
        .read_exact(&mut ts_bytes)
        .await
        .map_err(|err| EngineError::io("handshake.auth_timestamp", err))?;
    let client_timestamp = u64::from_le_bytes(ts_bytes);

    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    stream
        .write_all(&nonce)
        .await
        .map_err(|err| EngineError::io("handshake.auth_nonce_write", err))?;
    stream
        .flush()
        .await
        .map_err(|err| EngineError::io("handshake.auth_nonce_flush", err))?;

    let name_len = stream
        .read_u16_le()
        .await
        .map_err(|err| EngineError::io("handshake.auth_name_len", err))?;
    let mut name_bytes = vec![0u8; name_len as usize];
    stream
        .read_exact(&mut name_bytes)
        .await
        .map_err(|err| EngineError::io("handshake.auth_name", err))?;
    let name = String::from_utf8(name_bytes).map_err(|_| {
        EngineError::protocol("handshake.auth_name_not_utf8", "client name is not valid UTF-8")
    })?;

    let mut code = [0u8; 20];
    stream
        .read_exact(&mut code)
        .await
        .map_err(|err| EngineError::io("handshake.auth_code", err))?;

    let now = clock.now_unix_seconds();
    let skew = now.abs_diff(client_timestamp);
    let within_window = skew <= skew_window.as_secs();

    let verified = within_window
        && credentials
            .key_for(&name)
            .map(|key| {
                let mut mac = match HmacSha1::new_from_slice(&key) {
                    Ok(mac) => mac,
                    Err(_) => return false,
                };
                mac.update(&ts_bytes);
                mac.update(&nonce);
                mac.verify_slice(&code).is_ok()
            })
            .unwrap_or(false);

    if !verified {
        tracing::warn!(target: "roc_wire::handshake", client = %name, "auth handshake rejected");
    }
    let status_byte = if verified { 0u8 } else { 1u8 };
    stream
        .write_u8(status_byte)
        .await
        .map_err(|err| EngineError::io("handshake.auth_status_write", err))?;
    stream
        .flush()
        .await
        .map_err(|err| EngineError::io("handshake.auth_status_flush", err))?;

    if verified {
        Ok(name)
    } else {
        Err(EngineError::auth_rejected(
            "handshake.auth_rejected",
            "client authentication rejected",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapStore(HashMap<&'static str, Vec<u8>>);
    impl CredentialStore for MapStore {
        fn key_for(&self, name: &str) -> Option<Vec<u8>> {
            self.0.get(name).cloned()
        }
    }

    struct FixedClock(u64);
    impl AuthClock for FixedClock {
        fn now_unix_seconds(&self) -> u64 {
            self.0
        }
    }

    fn hmac_of(key: &[u8], ts: &[u8; 8], nonce: &[u8; 8]) -> [u8; 20] {
        let mut mac = HmacSha1::new_from_slice(key).unwrap();
        mac.update(ts);
        mac.update(nonce);
        let result = mac.finalize().into_bytes();
        let mut out = [0u8; 20];
        out.copy_from_slice(&result);
        out
    }

    #[tokio::test]
    async fn version_match_succeeds() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let node = tokio::spawn(async move { exchange_version(&mut a, 1).await });
        let client_peer = exchange_version(&mut b, 1).await.unwrap();
        assert_eq!(client_peer, 1);
        assert_eq!(node.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn version_mismatch_is_reported() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let node = tokio::spawn(async move { exchange_version(&mut a, 1).await });
        let _ = exchange_version(&mut b, 2).await;
        let err = node.await.unwrap().unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::VersionMismatch);
    }

    #[tokio::test]
    async fn successful_auth_round_trip() {
        let key = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let mut store = HashMap::new();
        store.insert("alice", key.clone());
        let store = MapStore(store);
        let clock = FixedClock(1_700_000_000);

        let (mut node_side, mut client_side) = tokio::io::duplex(4096);

        let node = tokio::spawn(async move {
            perform_auth_handshake(&mut node_side, &store, &clock, Duration::from_secs(30)).await
        });

        let ts: u64 = 1_700_000_000;
        client_side.write_all(&ts.to_le_bytes()).await.unwrap();
        let mut nonce = [0u8; 8];
        client_side.read_exact(&mut nonce).await.unwrap();

        let code = hmac_of(&key, &ts.to_le_bytes(), &nonce);
        let name = b"alice";
        client_side
            .write_u16_le(name.len() as u16)
            .await
            .unwrap();
        client_side.write_all(name).await.unwrap();
        client_side.write_all(&code).await.unwrap();

        let status = client_side.read_u8().await.unwrap();
        assert_eq!(status, 0);
        assert_eq!(node.await.unwrap().unwrap(), "alice");
    }

    #[tokio::test]
    async fn unknown_name_is_rejected() {
        let store = MapStore(HashMap::new());
        let clock = FixedClock(1_700_000_000);
        let (mut node_side, mut client_side) = tokio::io::duplex(4096);

        let node = tokio::spawn(async move {
            perform_auth_handshake(&mut node_side, &store, &clock, Duration::from_secs(30)).await
        });

        let ts: u64 = 1_700_000_000;
        client_side.write_all(&ts.to_le_bytes()).await.unwrap();
        let mut nonce = [0u8; 8];
        client_side.read_exact(&mut nonce).await.unwrap();
        client_side.write_u16_le(4).await.unwrap();
        client_side.write_all(b"carl").await.unwrap();
        client_side.write_all(&[0u8; 20]).await.unwrap();

        let status = client_side.read_u8().await.unwrap();
        assert_eq!(status, 1);
        let err = node.await.unwrap().unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::AuthRejected);
    }
}
