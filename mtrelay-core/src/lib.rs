#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dedup;
pub mod entities;
pub mod events;
pub mod framework;
pub mod hub;
pub mod metrics;
pub mod processors;
pub mod sealing;
pub mod settlement;
pub mod storage;
pub mod utils;
