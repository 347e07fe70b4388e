pub mod aggregate;
pub mod config;
pub mod dedupe;
pub mod duration;
pub mod engine;
pub mod error;
pub mod event;
pub mod normalize;
pub mod notify;
pub mod period;
pub mod reconcile;
pub mod record;
pub mod render;
pub mod rules;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;
