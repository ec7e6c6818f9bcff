//! Versioned serialization of [`AuthState`].
//!
//! Stored blobs are wrapped in a small envelope so that a later layout
//! change can be detected instead of silently misread:
//!
//! ```json
//! {"format": "oauth-session/auth-state", "version": 1, "state": { ... }}
//! ```

use serde::{Deserialize, Serialize};

use super::{AuthState, BrowserSessionStatus};
use crate::oauth::{Error, Result};

/// Envelope format tag.
pub const FORMAT_TAG: &str = "oauth-session/auth-state";

/// Current envelope version.
pub const FORMAT_VERSION: u32 = 1;

/// Converts authorization state to and from stored bytes.
pub trait StateCodec: Send + Sync {
    fn encode(&self, state: &AuthState) -> Result<Vec<u8>>;

    /// # Errors
    ///
    /// [`Error::Codec`] for bytes this codec did not produce.
    fn decode(&self, bytes: &[u8]) -> Result<AuthState>;
}

/// JSON codec with a format/version envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStateCodec;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: u32,
    state: &'a AuthState,
}

#[derive(Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    state: serde_json::Value,
}

impl StateCodec for JsonStateCodec {
    fn encode(&self, state: &AuthState) -> Result<Vec<u8>> {
        let envelope = EnvelopeRef {
            format: FORMAT_TAG,
            version: FORMAT_VERSION,
            state,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<AuthState> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::codec(format!("not an auth state envelope: {e}")))?;

        if envelope.format != FORMAT_TAG {
            return Err(Error::codec(format!(
                "unknown format '{}'",
                envelope.format
            )));
        }
        if envelope.version != FORMAT_VERSION {
            return Err(Error::codec(format!(
                "unsupported version {} (expected {FORMAT_VERSION})",
                envelope.version
            )));
        }

        serde_json::from_value(envelope.state)
            .map_err(|e| Error::codec(format!("malformed auth state: {e}")))
    }
}

#[derive(Serialize, Deserialize)]
struct BrowserRecord {
    status: BrowserSessionStatus,
}

/// Encode the browser session flag stored next to the auth state.
pub(crate) fn encode_browser_session(status: BrowserSessionStatus) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&BrowserRecord { status })?)
}

pub(crate) fn decode_browser_session(bytes: &[u8]) -> Result<BrowserSessionStatus> {
    serde_json::from_slice::<BrowserRecord>(bytes)
        .map(|record| record.status)
        .map_err(|e| Error::codec(format!("malformed browser state: {e}")))
}
