pub mod client_events;
pub mod codec;
pub mod event_type;
pub mod models;
pub mod server_events;
pub mod validate;
