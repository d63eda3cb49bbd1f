pub mod config;
pub mod logging;

pub mod catalog;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod limiter;
pub mod paths;
pub mod quota;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod transfer;
pub mod transport;

pub use engine::Engine;
