/// `input/` — normalized input events, routing and transport reconciliation
///
/// MIDI/OSC drivers live outside this crate; they deliver `InputEvent`s
/// and receive the set of transports modules have pinned themselves to.
pub mod event;
pub mod reconcile;
pub mod router;

pub use event::InputEvent;
pub use reconcile::{InputReconciler, SourceReconciler};
pub use router::route_input_event;
