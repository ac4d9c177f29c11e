//! Event structures sent from the library to the embedding frontend.

use std::path::PathBuf;

use super::view_model::UiState;
use crate::core::{AggregationResult, Progress};

/// Events pushed to the embedder through an [`EventProxy`].
///
/// Each variant carries everything a frontend needs to react without
/// reaching back into the shared state.
///
/// [`EventProxy`]: super::proxy::EventProxy
#[derive(Debug)]
pub enum UserEvent {
    /// A complete state snapshot to re-render the UI from.
    StateUpdate(Box<UiState>),
    /// A progress update during a directory scan.
    ScanProgress(Progress),
    /// A progress update during content aggregation.
    GenerationProgress(Progress),
    /// The outcome of one aggregation run, sent exactly once per run.
    GenerationComplete(Box<AggregationResult>),
    /// Content for the file preview panel.
    ShowFilePreview { content: String, path: PathBuf },
    /// An error message to be displayed to the user.
    ShowError(String),
}
