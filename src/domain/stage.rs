use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Coarse area of the system an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    File,
    Encoding,
    Header,
    Schema,
    Row,
    Copy,
    Db,
    Request,
    Startup,
}

/// Lifecycle of a single upload.
///
/// `Committed` and `Failed` are terminal. Storage side effects start at
/// `TableProvisioned`; any failure from there on rolls them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UploadState {
    Init,
    Decoded,
    HeaderNormalized,
    SchemaMatched,
    TableProvisioned,
    Loading,
    Registered,
    Committed,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Committed | UploadState::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadState::Init => "init",
            UploadState::Decoded => "decoded",
            UploadState::HeaderNormalized => "header_normalized",
            UploadState::SchemaMatched => "schema_matched",
            UploadState::TableProvisioned => "table_provisioned",
            UploadState::Loading => "loading",
            UploadState::Registered => "registered",
            UploadState::Committed => "committed",
            UploadState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Tracks an upload through [`UploadState`], refusing to move backwards or
/// out of a terminal state.
#[derive(Debug)]
pub struct UploadProgress {
    state: UploadState,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self {
            state: UploadState::Init,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn advance(&mut self, next: UploadState) {
        if self.state.is_terminal() || next <= self.state {
            debug!(from = %self.state, to = %next, "ignoring out-of-order upload transition");
            return;
        }
        debug!(from = %self.state, to = %next, "upload stage");
        self.state = next;
    }

    /// Marks the upload failed and reports whether storage work must be undone.
    pub fn fail(&mut self) -> bool {
        let had_side_effects =
            self.state >= UploadState::TableProvisioned && !self.state.is_terminal();
        if !self.state.is_terminal() {
            debug!(from = %self.state, "upload failed");
            self.state = UploadState::Failed;
        }
        had_side_effects
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}
