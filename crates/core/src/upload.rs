//! Upload session types and lifecycle.

use crate::file_name::FileName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;

/// Default prefix for assembled objects in the remote store.
pub const DEFAULT_KEY_PREFIX: &str = "uploads";

/// Position of one fragment within a logical upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentSpec {
    index: u32,
    total_chunks: u32,
}

impl FragmentSpec {
    /// Validate an index against a declared total.
    ///
    /// `max_total_chunks` bounds the total so a single request cannot make the
    /// assembler probe an arbitrary number of staging keys.
    pub fn new(index: u32, total_chunks: u32, max_total_chunks: u32) -> crate::Result<Self> {
        if total_chunks == 0 || total_chunks > max_total_chunks {
            return Err(crate::Error::InvalidTotalChunks {
                total: total_chunks,
                max: max_total_chunks,
            });
        }

        if index >= total_chunks {
            return Err(crate::Error::InvalidChunkIndex {
                index,
                total: total_chunks,
            });
        }

        Ok(Self {
            index,
            total_chunks,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Whether this fragment carries the last index and triggers assembly.
    pub fn is_final(&self) -> bool {
        self.index == self.total_chunks - 1
    }
}

/// Staging key for one fragment of a logical upload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FragmentKey<'a> {
    pub file_name: &'a FileName,
    pub index: u32,
}

impl<'a> FragmentKey<'a> {
    pub fn new(file_name: &'a FileName, index: u32) -> Self {
        Self { file_name, index }
    }

    /// Render the staging key (`<file name>.part<index>`).
    pub fn to_key(&self) -> String {
        format!("{}.part{}", self.file_name, self.index)
    }
}

impl fmt::Display for FragmentKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.part{}", self.file_name, self.index)
    }
}

/// Staging key of the combined artifact for a logical upload.
pub fn combined_key(file_name: &FileName) -> String {
    file_name.as_str().to_string()
}

/// Remote object key for an assembled upload (`<prefix>/<unix-ms>-<file name>`).
pub fn remote_object_key(prefix: &str, at: OffsetDateTime, file_name: &FileName) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{millis}-{file_name}")
    } else {
        format!("{prefix}/{millis}-{file_name}")
    }
}

/// Fragments received so far for one logical upload.
///
/// Pure value object: completion detection does no I/O, the caller fills
/// `received` from whatever staging reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub file_name: FileName,
    pub total_chunks: u32,
    pub received: BTreeSet<u32>,
}

impl UploadSession {
    pub fn new(file_name: FileName, total_chunks: u32) -> Self {
        Self {
            file_name,
            total_chunks,
            received: BTreeSet::new(),
        }
    }

    /// Record a received fragment index. Indices outside the declared total are ignored.
    pub fn record(&mut self, index: u32) -> bool {
        if index >= self.total_chunks {
            return false;
        }
        self.received.insert(index)
    }

    /// Whether every index in `0..total_chunks` has been received.
    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0
            && self.received.len() == self.total_chunks as usize
            && self.received.iter().all(|i| *i < self.total_chunks)
    }

    /// Indices that have not been received, in ascending order.
    pub fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }
}

/// Assembly lifecycle for one logical upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyState {
    /// Fragments are arriving.
    Receiving,
    /// Final fragment received, fragments being concatenated.
    Assembling,
    /// Combined artifact being sent to the object store.
    Uploading,
    /// Uploaded and cleaned up.
    Done,
    /// Assembly or upload failed. Leftovers are reclaimed by the sweep.
    Failed,
}

impl AssemblyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receiving => "receiving",
            Self::Assembling => "assembling",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Check if the upload reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(&self, next: AssemblyState) -> bool {
        matches!(
            (self, next),
            (Self::Receiving, Self::Assembling)
                | (Self::Assembling, Self::Uploading)
                | (Self::Assembling, Self::Failed)
                | (Self::Uploading, Self::Done)
                | (Self::Uploading, Self::Failed)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: AssemblyState) -> crate::Result<()> {
        if !self.can_transition_to(next) {
            return Err(crate::Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response body for a fragment submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    /// Public location of the assembled object (final fragment only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn received() -> Self {
        Self {
            success: true,
            url: None,
            error: None,
        }
    }

    pub fn assembled(url: String) -> Self {
        Self {
            success: true,
            url: Some(url),
            error: None,
        }
    }
}
