//! Configuration module for binstage.
//!
//! Resolves the role directory layout and the runtime knobs for a run.

mod platform;
mod settings;

pub use platform::HostPlatform;
pub use settings::{Settings, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_TOOLS_KEY};
