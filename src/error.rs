/// `error.rs` — host error taxonomy
///
/// RPC-layer failures travel as structured `RpcResponse` values; these
/// variants are raised by the lifecycle layer and caught at its public
/// entry points.
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// Bad module id or unreadable source.
    #[error("module load failed for '{module_id}': {reason}")]
    ModuleLoad { module_id: String, reason: String },

    /// Disallowed or missing import declaration.
    #[error("capability violation in '{module_id}': {reason}")]
    CapabilityViolation { module_id: String, reason: String },

    #[error("sandbox bridge is unavailable")]
    SandboxUnavailable,

    #[error("sandbox client has been disposed")]
    SandboxDisposed,

    #[error("sandbox session could not be established: {0}")]
    SandboxEnsureFailed(String),

    #[error("sandbox initTrack failed: {0}")]
    SandboxTrackInitFailed(String),

    #[error("sandbox setMatrixForInstance failed for '{instance_id}': {error}")]
    SandboxSetMatrixFailed { instance_id: String, error: String },

    #[error("sandbox invokeOnInstance failed for '{instance_id}.{method}': {error}")]
    SandboxInvokeFailed {
        instance_id: String,
        method: String,
        error: String,
    },

    #[error("track not found: {0}")]
    TrackNotFound(String),

    #[error("invalid channel path: {0}")]
    InvalidChannelPath(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl HostError {
    /// Stable machine-readable code, used as the `error` field of
    /// structured RPC failures.
    pub fn code(&self) -> &'static str {
        match self {
            HostError::ModuleLoad { .. } => "MODULE_LOAD_ERROR",
            HostError::CapabilityViolation { .. } => "CAPABILITY_VIOLATION",
            HostError::SandboxUnavailable => "SANDBOX_UNAVAILABLE",
            HostError::SandboxDisposed => "SANDBOX_DISPOSED",
            HostError::SandboxEnsureFailed(_) => "SANDBOX_ENSURE_FAILED",
            HostError::SandboxTrackInitFailed(_) => "SANDBOX_TRACK_INIT_FAILED",
            HostError::SandboxSetMatrixFailed { .. } => "SANDBOX_SET_MATRIX_FAILED",
            HostError::SandboxInvokeFailed { .. } => "SANDBOX_INVOKE_FAILED",
            HostError::TrackNotFound(_) => "TRACK_NOT_FOUND",
            HostError::InvalidChannelPath(_) => "INVALID_CHANNEL_PATH",
            HostError::Config(_) => "CONFIG_ERROR",
            HostError::Io(_) => "IO_ERROR",
        }
    }

    pub fn module_load(module_id: &str, reason: impl Into<String>) -> Self {
        HostError::ModuleLoad {
            module_id: module_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::Io(err.to_string())
    }
}

pub type HostResult<T> = Result<T, HostError>;
