pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod monitors;
pub mod notifier;
pub mod queue;
pub mod redis_store;
pub mod scheduler;
pub mod sources;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

