//! Versioned framing around bincode for whole-emulator save states.
//!
//! The payload layout is owned by each core's struct definitions; this module
//! only contributes the magic/version header so that states from a different
//! build are rejected instead of misinterpreted.

use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"RTRS";

type BincodeConfig = bincode::config::Configuration;

fn bincode_config() -> BincodeConfig {
    bincode::config::standard()
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("save state is truncated or not a save state")]
    Malformed,
    #[error("save state version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
    #[error("error serializing save state: {0}")]
    Encode(#[from] EncodeError),
    #[error("error deserializing save state: {0}")]
    Decode(#[from] DecodeError),
}

/// Serialize `state` into `out` with a magic/version header.
///
/// # Errors
///
/// Propagates any bincode encoding error.
pub fn save<E: Encode>(state: &E, version: &str, out: &mut Vec<u8>) -> Result<(), SaveStateError> {
    out.clear();
    out.extend_from_slice(MAGIC);
    out.push(version.len() as u8);
    out.extend_from_slice(version.as_bytes());
    bincode::encode_into_std_write(state, out, bincode_config())?;
    Ok(())
}

/// Deserialize a state previously produced by [`save`] with the same version.
///
/// # Errors
///
/// Returns an error if the header is malformed, the version does not match,
/// or the payload fails to decode.
pub fn load<D: Decode<()>>(bytes: &[u8], version: &str) -> Result<D, SaveStateError> {
    let Some((magic, rest)) = bytes.split_at_checked(MAGIC.len()) else {
        return Err(SaveStateError::Malformed);
    };
    if magic != MAGIC {
        return Err(SaveStateError::Malformed);
    }

    let Some((&[version_len], rest)) = rest.split_at_checked(1) else {
        return Err(SaveStateError::Malformed);
    };
    let Some((found_version, payload)) = rest.split_at_checked(version_len.into()) else {
        return Err(SaveStateError::Malformed);
    };

    if found_version != version.as_bytes() {
        return Err(SaveStateError::VersionMismatch {
            expected: version.into(),
            found: String::from_utf8_lossy(found_version).into_owned(),
        });
    }

    let (state, _) = bincode::decode_from_slice(payload, bincode_config())?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq, Encode, Decode)]
    struct TestState {
        pc: u16,
        cycles: u64,
        ram: Vec<u8>,
    }

    #[test]
    fn round_trip() {
        let state = TestState { pc: 0x8000, cycles: 123_456, ram: vec![1, 2, 3] };

        let mut bytes = Vec::new();
        save(&state, "1", &mut bytes).unwrap();

        let loaded: TestState = load(&bytes, "1").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn version_mismatch_rejected() {
        let state = TestState { pc: 0, cycles: 0, ram: vec![] };

        let mut bytes = Vec::new();
        save(&state, "1", &mut bytes).unwrap();

        assert!(matches!(
            load::<TestState>(&bytes, "2"),
            Err(SaveStateError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn truncated_input_rejected() {
        assert!(matches!(load::<TestState>(b"RT", "1"), Err(SaveStateError::Malformed)));
        assert!(matches!(load::<TestState>(b"XXXX\x011", "1"), Err(SaveStateError::Malformed)));
    }
}
