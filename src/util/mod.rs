//! Utility helpers

pub mod deferred;

pub use deferred::DeferredTask;
