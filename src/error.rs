//! Error types for taskbench operations.
//!
//! Each subsystem defines its own `thiserror` enum next to its code; this
//! module re-exports them so callers can import from one place:
//! - Path confinement ([`PathError`])
//! - Tool execution ([`ToolError`], [`ToolErrorKind`])
//! - Envelope extraction ([`MalformedEnvelope`])
//! - Sandbox lifecycle ([`SandboxError`])
//! - Run aggregation ([`RunError`])

pub use crate::envelope::MalformedEnvelope;
pub use crate::runner::RunError;
pub use crate::sandbox::{PathError, SandboxError};
pub use crate::tools::{ToolError, ToolErrorKind};
