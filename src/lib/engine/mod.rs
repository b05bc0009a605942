pub mod api;
pub mod events;
pub mod state;
pub mod stats;
pub mod types;
