//! Validated file names for logical uploads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest single path component common filesystems accept, in bytes.
pub const MAX_PATH_COMPONENT_LEN: usize = 255;

/// Bytes staging may append to a file name: `.part<u32>` on fragment keys,
/// then `.tmp.<uuid>` while a write is in flight.
pub const STAGING_SUFFIX_RESERVE: usize = ".part".len() + 10 + ".tmp.".len() + 36;

/// Maximum file name length in bytes, so every staging key stays a valid
/// path component.
pub const MAX_FILE_NAME_LEN: usize = MAX_PATH_COMPONENT_LEN - STAGING_SUFFIX_RESERVE;

/// Name of a logical upload, as declared by the client.
///
/// The name is used verbatim to build staging keys and the remote object key,
/// so anything that could address a different directory is rejected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    /// Parse and validate a file name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidFileName(
                "file name cannot be empty".to_string(),
            ));
        }

        if s.len() > MAX_FILE_NAME_LEN {
            return Err(crate::Error::InvalidFileName(format!(
                "file name too long: {} bytes (max: {})",
                s.len(),
                MAX_FILE_NAME_LEN
            )));
        }

        if s == "." || s == ".." {
            return Err(crate::Error::InvalidFileName(format!(
                "reserved file name: {s}"
            )));
        }

        if let Some(c) = s
            .chars()
            .find(|c| *c == '/' || *c == '\\' || c.is_control())
        {
            return Err(crate::Error::InvalidFileName(format!(
                "file name contains forbidden character {c:?}: {s}"
            )));
        }

        Ok(Self(s.to_string()))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FileName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<FileName> for String {
    fn from(value: FileName) -> Self {
        value.0
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileName({:?})", self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
