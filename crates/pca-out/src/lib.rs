//! PCA-OUT: Summaries and Explanations from Templates
//!
//! Renders the user-facing text the orchestrator needs when no Planner
//! summary is available: count-based execution summaries, abort
//! explanations, intent acknowledgements and confirmation prompts.
//!
//! # Example
//!
//! ```ignore
//! use pca_out::SummaryRenderer;
//!
//! let renderer = SummaryRenderer::builtin()?;
//! let text = renderer.abort_explanation("plan declined by user");
//! assert!(text.starts_with("I could not complete this safely because"));
//! ```

pub mod renderer;
pub mod templates;

use thiserror::Error;

pub use renderer::SummaryRenderer;
pub use templates::{Template, TemplatesFile, BUILTIN_TEMPLATES};

/// Errors that can occur during rendering
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template load failed: {0}")]
    Template(String),
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),
    #[error("Render failed: {0}")]
    Render(String),
}
