use crate::track::{dispatch::channel_path, TrackController};

use super::event::InputEvent;

/// Route one normalized input event to the controller. Unresolvable
/// triggers are logged and dropped.
pub async fn route_input_event(controller: &TrackController, event: InputEvent) {
    match event {
        InputEvent::TrackSelection(selection) => {
            log::debug!(
                "[input] {} selects track '{}'",
                selection.source,
                selection.track_name
            );
            controller.select_track(&selection.track_name).await;
        }
        InputEvent::MethodTrigger(trigger) => {
            let active = controller.active_track();
            match trigger.resolve_channel(active.as_ref()) {
                Some(channel) => {
                    controller
                        .handle_channel_message(&channel_path(channel))
                        .await
                }
                None => log::debug!(
                    "[input] {} trigger (note {:?}, address {:?}) has no channel mapping",
                    trigger.source,
                    trigger.note,
                    trigger.address
                ),
            }
        }
    }
}
