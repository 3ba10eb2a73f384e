//! Peerdex peer agent.
//!
//! A peer registers files from its shared directory with the index server and
//! serves each one on its own TCP port. Downloads are fetched from another
//! peer's serving task and immediately re-registered under this peer's name.

pub mod agent;
pub mod client;
pub mod config;
pub mod console;
pub mod download;
pub mod errors;
pub mod registry;
pub mod serving;

pub use agent::{DownloadReport, PeerAgent, ServingOptions};
pub use client::IndexClient;
pub use config::AgentConfig;
pub use console::{Command, Console, COMMAND_PROMPT};
pub use errors::{AgentError, Result};
pub use registry::{LocalServedFile, ServedFiles};
pub use serving::{ServedFile, ServingHandle, Transfer};
