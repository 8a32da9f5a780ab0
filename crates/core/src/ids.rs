use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::consts::SITE_ID_LEN;
use crate::error::CoreError;

/// Identity of one database instance. Generated once, persisted, and attached
/// to every change that instance applies on behalf of a peer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId([u8; SITE_ID_LEN]);

impl SiteId {
    pub fn generate() -> Self {
        Self(*Uuid::now_v7().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; SITE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; SITE_ID_LEN] = bytes.try_into().map_err(|_| {
            CoreError::InvalidData(format!(
                "site id must be {SITE_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SITE_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SiteId({:02x}{:02x}{:02x}{:02x})",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = SiteId::generate();
        let b = SiteId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(SiteId::from_slice(&[0u8; 15]).is_err());
        assert!(SiteId::from_slice(&[0u8; 17]).is_err());
        let id = SiteId::from_slice(&[7u8; 16]).unwrap();
        assert_eq!(id.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn display_is_full_hex() {
        let id = SiteId::from_bytes([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
    }
}
