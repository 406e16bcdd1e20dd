//! Credential storage: the `CredentialStore` trait used by the auth
//! handshake, plus a reference implementation of the text format loaded
//! at node startup (spec.md §6): one `name:hex-key` per line,
//! colon-separated, newline-terminated. Comments and empty lines are not
//! permitted; a file over the caller-set size cap, or a line that fails
//! the per-line validator, is a startup error.

use crate::handshake::CredentialStore;
use roc_core::error::{EngineError, Result};
use std::collections::HashMap;

/// In-memory `name -> key` table, built once at startup and then shared
/// read-only across connections.
#[derive(Debug, Default)]
pub struct TextCredentialStore {
    keys: HashMap<String, Vec<u8>>,
}

impl CredentialStore for TextCredentialStore {
    fn key_for(&self, name: &str) -> Option<Vec<u8>> {
        self.keys.get(name).cloned()
    }
}

/// Rejects a candidate `name:hex-key` line before it is accepted into a
/// store. The default validator requires a non-empty name with no colon
/// and a non-empty, even-length hex key; callers with stricter naming
/// rules can supply their own.
pub type LineValidator = dyn Fn(&str, &[u8]) -> bool;

fn default_validator(name: &str, key: &[u8]) -> bool {
    !name.is_empty() && !key.is_empty()
}

impl TextCredentialStore {
    /// Parses `contents` under the §6 text format, rejecting the whole
    /// file if it exceeds `max_len_bytes` or any line fails `validator`.
    /// Comment lines and blank lines are not a lenient no-op here; they
    /// are malformed lines like any other, per spec.md §6.
    pub fn parse(
        contents: &str,
        max_len_bytes: usize,
        validator: &LineValidator,
    ) -> Result<Self> {
        if contents.len() > max_len_bytes {
            return Err(EngineError::protocol(
                "credentials.file_too_large",
                format!(
                    "credential file is {} bytes, cap is {max_len_bytes}",
                    contents.len()
                ),
            ));
        }

        let mut keys = HashMap::new();
        for (line_no, line) in contents.lines().enumerate() {
            let (name, hex_key) = line.split_once(':').ok_or_else(|| {
                EngineError::protocol(
                    "credentials.malformed_line",
                    format!("line {} is not `name:hex-key`", line_no + 1),
                )
            })?;

            let key = hex::decode(hex_key).map_err(|_| {
                EngineError::protocol(
                    "credentials.malformed_line",
                    format!("line {} has a non-hex key", line_no + 1),
                )
            })?;

            if !validator(name, &key) {
                return Err(EngineError::protocol(
                    "credentials.malformed_line",
                    format!("line {} failed credential validation", line_no + 1),
                ));
            }

            if keys.insert(name.to_string(), key).is_some() {
                return Err(EngineError::protocol(
                    "credentials.duplicate_name",
                    format!("line {} duplicates an already-registered name", line_no + 1),
                ));
            }
        }

        Ok(Self { keys })
    }

    /// Parses with the default validator (non-empty name, non-empty key).
    pub fn parse_default(contents: &str, max_len_bytes: usize) -> Result<Self> {
        Self::parse(contents, max_len_bytes, &default_validator)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_file() {
        let contents = "alice:00112233445566778899aabbccddeeff\nbob:aabbcc\n";
        let store = TextCredentialStore::parse_default(contents, 4096).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.key_for("alice"), Some(hex::decode("00112233445566778899aabbccddeeff").unwrap()));
        assert_eq!(store.key_for("carl"), None);
    }

    #[test]
    fn rejects_blank_lines() {
        let contents = "alice:aabbcc\n\nbob:ccddee\n";
        let err = TextCredentialStore::parse_default(contents, 4096).unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::Protocol);
    }

    #[test]
    fn rejects_comment_lines() {
        let contents = "# this is a comment\nalice:aabbcc\n";
        let err = TextCredentialStore::parse_default(contents, 4096).unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::Protocol);
    }

    #[test]
    fn rejects_non_hex_key() {
        let contents = "alice:not-hex\n";
        assert!(TextCredentialStore::parse_default(contents, 4096).is_err());
    }

    #[test]
    fn rejects_oversize_file() {
        let contents = "alice:aabbcc\n";
        let err = TextCredentialStore::parse_default(contents, 4).unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::Protocol);
    }

    #[test]
    fn rejects_duplicate_name() {
        let contents = "alice:aabbcc\nalice:ccddee\n";
        assert!(TextCredentialStore::parse_default(contents, 4096).is_err());
    }
}
