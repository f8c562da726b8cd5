//! roverlay turns a base image plus an edit instruction into a separate,
//! transparent overlay and a suggested placement for it.
//!
//! The pipeline makes two model calls: a vision model locates the object and
//! writes a brief, then an image model draws it. The result is cleaned of any
//! painted-on background before it is returned.

pub mod composite;
pub mod config;
pub mod error;
pub mod gemini;
pub mod geometry;
pub mod logger;
pub mod models;
pub mod pipeline;
pub mod prompt;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod stages;
pub mod transparency;

pub use config::{Config, GeminiConfig};
pub use error::{FailureKind, OverlayError, Result};
pub use gemini::{GeminiClient, Transport};
pub use models::*;
pub use pipeline::{Failure, Orchestrator, Progress, ValidRequest};
pub use prompt::PromptTemplate;
pub use session::{OverlaySession, PlacementManifest};
