//! Engine-wide tunables, built with the same fluent `with_*` builder
//! pattern `spark-transport-tcp::TcpSocketConfig` uses for socket
//! options.

use std::time::Duration;

/// Socket-level knobs applied once per accepted connection via
/// `socket2::SockRef`, the way `TcpSocketConfig::apply` drives
/// `SO_LINGER`.
#[derive(Clone, Debug)]
pub struct SocketTuning {
    keepalive: bool,
    keepidle: Duration,
    keepcount: u32,
    keepinterval: Duration,
    syn_retries: u32,
    nodelay: bool,
}

impl Default for SocketTuning {
    fn default() -> Self {
        Self {
            keepalive: true,
            keepidle: Duration::from_secs(5),
            keepcount: 3,
            keepinterval: Duration::from_secs(3),
            syn_retries: 1,
            nodelay: false,
        }
    }
}

impl SocketTuning {
    pub const fn new() -> Self {
        Self {
            keepalive: true,
            keepidle: Duration::from_secs(5),
            keepcount: 3,
            keepinterval: Duration::from_secs(3),
            syn_retries: 1,
            nodelay: false,
        }
    }

    pub fn with_keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    pub fn with_keepidle(mut self, keepidle: Duration) -> Self {
        self.keepidle = keepidle;
        self
    }

    pub fn with_keepcount(mut self, keepcount: u32) -> Self {
        self.keepcount = keepcount;
        self
    }

    pub fn with_keepinterval(mut self, keepinterval: Duration) -> Self {
        self.keepinterval = keepinterval;
        self
    }

    pub fn with_syn_retries(mut self, retries: u32) -> Self {
        self.syn_retries = retries;
        self
    }

    pub fn with_nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn keepidle(&self) -> Duration {
        self.keepidle
    }

    pub fn keepcount(&self) -> u32 {
        self.keepcount
    }

    pub fn keepinterval(&self) -> Duration {
        self.keepinterval
    }

    pub fn syn_retries(&self) -> u32 {
        self.syn_retries
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    /// Applies every option to a live socket via `socket2::SockRef`, in
    /// the same pattern `TcpSocketConfig::apply` uses for `SO_LINGER`.
    pub fn apply(&self, socket: &tokio::net::TcpStream) -> std::io::Result<()> {
        let sock = socket2::SockRef::from(socket);
        sock.set_keepalive(self.keepalive)?;
        if self.keepalive {
            sock.set_tcp_keepalive(
                &socket2::TcpKeepalive::new()
                    .with_time(self.keepidle)
                    .with_interval(self.keepinterval)
                    .with_retries(self.keepcount),
            )?;
        }
        sock.set_nodelay(self.nodelay)?;
        Ok(())
    }
}

/// Top-level engine configuration, constructed once at startup and
/// shared read-only across every `Connection`.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    request_set_cap: usize,
    protocol_version: u8,
    auth_skew_window: Duration,
    credential_file_max_bytes: usize,
    max_frame_len: u32,
    socket: SocketTuning,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_set_cap: 5000,
            protocol_version: 1,
            auth_skew_window: Duration::from_secs(30),
            credential_file_max_bytes: 1024 * 1024,
            max_frame_len: roc_wire::DEFAULT_MAX_FRAME_LEN,
            socket: SocketTuning::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_set_cap(mut self, cap: usize) -> Self {
        self.request_set_cap = cap;
        self
    }

    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_auth_skew_window(mut self, window: Duration) -> Self {
        self.auth_skew_window = window;
        self
    }

    pub fn with_credential_file_max_bytes(mut self, max_bytes: usize) -> Self {
        self.credential_file_max_bytes = max_bytes;
        self
    }

    pub fn with_max_frame_len(mut self, max_len: u32) -> Self {
        self.max_frame_len = max_len;
        self
    }

    pub fn with_socket_tuning(mut self, tuning: SocketTuning) -> Self {
        self.socket = tuning;
        self
    }

    pub fn request_set_cap(&self) -> usize {
        self.request_set_cap
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    pub fn auth_skew_window(&self) -> Duration {
        self.auth_skew_window
    }

    pub fn credential_file_max_bytes(&self) -> usize {
        self.credential_file_max_bytes
    }

    pub fn max_frame_len(&self) -> u32 {
        self.max_frame_len
    }

    pub fn socket(&self) -> &SocketTuning {
        &self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::new()
            .with_request_set_cap(10)
            .with_protocol_version(2);
        assert_eq!(config.request_set_cap(), 10);
        assert_eq!(config.protocol_version(), 2);
        assert_eq!(config.auth_skew_window(), Duration::from_secs(30));
    }
}
