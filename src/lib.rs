pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod input;
pub mod modules;
pub mod sandbox;
pub mod track;
pub mod types;

pub use config::HostConfig;
pub use context::HostContext;
pub use error::{HostError, HostResult};
pub use host::{run, Host, HostCommand};
pub use track::{TrackController, TrackPhase, TrackStatus};
