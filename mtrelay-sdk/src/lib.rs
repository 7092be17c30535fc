//! Wire types shared between the mtrelay server and its clients.
//!
//! - [`objects`] holds the event envelope, upstream relay frames, control API
//!   bodies and downstream stream messages.
//! - [`signature`] implements the follower stream authentication scheme.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod objects;
pub mod signature;
