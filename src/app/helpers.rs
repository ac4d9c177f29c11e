//! Helpers shared by the command handlers and background tasks.

use std::sync::{Arc, Mutex};

use super::events::UserEvent;
use super::proxy::EventProxy;
use super::state::AppState;
use super::view_model::generate_ui_state;

/// Locks the state, applies a mutation, and pushes a fresh
/// [`UserEvent::StateUpdate`] to the embedder.
///
/// Every handler that changes observable state goes through this so a
/// frontend never has to poll.
pub fn with_state_and_notify<F, P: EventProxy>(
    state: &Arc<Mutex<AppState>>,
    proxy: &P,
    update_fn: F,
) where
    F: FnOnce(&mut AppState),
{
    let mut state_guard = state
        .lock()
        .expect("Mutex was poisoned. This should not happen.");

    update_fn(&mut state_guard);

    let ui_state = generate_ui_state(&state_guard);
    proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
}
