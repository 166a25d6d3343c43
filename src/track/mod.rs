/// `track/` — track lifecycle, channel dispatch and module preview
///
/// `TrackController` owns which track is active, the sandbox session it
/// runs in and the single-module preview. All state sits behind one std
/// `Mutex` that is never held across an await; in-flight flows are
/// cancelled by comparing epochs after every suspension point.
pub mod controller;
pub mod dispatch;
pub mod methods;
pub mod preview;

pub use controller::{InstanceRecord, LoadedSession, TrackController, TrackPhase, TrackStatus};
pub use dispatch::{build_channel_handler_map, parse_channel_path, ChannelHandler, ChannelHandlerMap};

#[cfg(test)]
pub(crate) mod testing;
