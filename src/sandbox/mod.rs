//! Sandbox confinement for one evaluation run.
//!
//! Every run owns an isolated directory tree. [`path`] confines agent-supplied
//! paths to that tree; [`instance`] manages its lifecycle (seeding, layout
//! rendering, guaranteed teardown).

pub mod instance;
pub mod path;

pub use instance::{SandboxError, SandboxInstance};
pub use path::{resolve, PathError};
