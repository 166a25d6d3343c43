/// `sandbox/` — isolated module runtime and the RPC layer in front of it
///
/// The host never touches module code directly. Every interaction goes
/// through a `SandboxClient` session over a `SandboxBridge`; the bundled
/// bridge is a Lua runtime on its own worker thread.
pub mod api;
pub mod bridge;
pub mod client;
pub mod protocol;
pub mod runtime;
pub mod vm;

#[cfg(test)]
pub mod testing;
