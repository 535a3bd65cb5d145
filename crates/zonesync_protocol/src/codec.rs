//! CBOR encoding helpers.
//!
//! Every protocol type derives `serde` traits; these helpers encode them with
//! `ciborium`. Persisted files additionally carry a 4-byte magic and a format
//! version so a wrong or newer file is rejected instead of misread.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
}

/// Encodes a value behind a magic + version header.
pub fn seal<T: Serialize>(magic: [u8; 4], value: &T) -> ProtocolResult<Vec<u8>> {
    let body = to_cbor(value)?;
    let mut buf = Vec::with_capacity(body.len() + 6);
    buf.extend_from_slice(&magic);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decodes a value written by [`seal`].
pub fn unseal<T: DeserializeOwned>(magic: [u8; 4], bytes: &[u8]) -> ProtocolResult<T> {
    if bytes.len() < 6 || bytes[0..4] != magic {
        return Err(ProtocolError::InvalidFormat("bad magic".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > FORMAT_VERSION {
        return Err(ProtocolError::InvalidFormat(format!(
            "unsupported format version: {version}"
        )));
    }
    from_cbor(&bytes[6..])
}
