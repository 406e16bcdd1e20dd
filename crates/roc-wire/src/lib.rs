//! `roc-wire`: frame codec, request-message layout, and the
//! version/auth handshakes run once per connection. No connection
//! lifecycle or task orchestration lives here, that's `roc-engine`.

pub mod credentials;
pub mod frame;
pub mod handshake;
pub mod message;

pub use credentials::TextCredentialStore;
pub use frame::{read_frame, write_frame, MessageType, DEFAULT_MAX_FRAME_LEN};
pub use handshake::{exchange_version, perform_auth_handshake, AuthClock, CredentialStore, SystemAuthClock};
pub use message::{Command, GlobalStatus, RequestId, RequestStatus};
