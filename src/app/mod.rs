//! Application layer: shared state, command handlers and the
//! background tasks they spawn. A frontend embeds this by holding an
//! `Arc<Mutex<AppState>>`, implementing [`EventProxy`] and calling
//! into [`commands`].

pub mod commands;
pub mod events;
pub mod helpers;
pub mod proxy;
pub mod state;
pub mod tasks;
pub mod view_model;

pub use events::UserEvent;
pub use proxy::EventProxy;
pub use state::AppState;
