use async_trait::async_trait;

use super::protocol::{RpcResponse, SandboxRequest};

/// Host side of the narrow channel into an isolated runtime.
///
/// Implementations own the actual sessions; `SandboxClient` layers the
/// session state machine, timeouts and disposal rules on top.
#[async_trait]
pub trait SandboxBridge: Send + Sync {
    /// Create a session and return its token.
    async fn ensure(&self) -> Result<String, String>;

    /// Execute one request against the session identified by `token`.
    async fn request(&self, token: &str, request: SandboxRequest) -> RpcResponse;

    /// Tear the session down. Unknown tokens are ignored.
    async fn destroy(&self, token: &str);
}
