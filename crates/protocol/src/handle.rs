//! File handle: object location plus symmetric key.
//!
//! The handle is the only credential needed to fetch and decrypt a stored
//! object. On the wire it is `hex(location) || hex(key)`, 128 lowercase hex
//! characters.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

use crate::ProtocolError;
use crate::constants::{KEY_LEN, LOCATION_LEN};

/// Length of a hex-encoded handle.
pub const HANDLE_HEX_LEN: usize = 2 * (LOCATION_LEN + KEY_LEN);

/// Location and key of one stored object.
#[derive(Clone, PartialEq, Eq)]
pub struct FileHandle {
    location: [u8; LOCATION_LEN],
    key: [u8; KEY_LEN],
}

impl FileHandle {
    /// Builds a handle from its two halves.
    pub fn new(location: [u8; LOCATION_LEN], key: [u8; KEY_LEN]) -> Self {
        Self { location, key }
    }

    /// Generates a random location and a random symmetric key.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut location = [0u8; LOCATION_LEN];
        let mut key = [0u8; KEY_LEN];
        rng.fill_bytes(&mut location);
        rng.fill_bytes(&mut key);
        Self { location, key }
    }

    pub fn location(&self) -> &[u8; LOCATION_LEN] {
        &self.location
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Hex-encoded location, as sent in `fileHandle` / `fileID` fields.
    pub fn location_hex(&self) -> String {
        hex::encode(self.location)
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", hex::encode(self.location), hex::encode(self.key))
    }
}

// Never print the key half in logs.
impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("location", &self.location_hex())
            .finish_non_exhaustive()
    }
}

impl FromStr for FileHandle {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != HANDLE_HEX_LEN {
            return Err(ProtocolError::InvalidHandle(format!(
                "expected {HANDLE_HEX_LEN} hex characters, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|e| ProtocolError::InvalidHandle(e.to_string()))?;

        let mut location = [0u8; LOCATION_LEN];
        let mut key = [0u8; KEY_LEN];
        location.copy_from_slice(&bytes[..LOCATION_LEN]);
        key.copy_from_slice(&bytes[LOCATION_LEN..]);
        Ok(Self { location, key })
    }
}
