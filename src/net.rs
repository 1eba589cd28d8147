//! The wire protocol and its endpoints.
//!
//! Requests and responses share one shape, [`Frame`]: header lines, a
//! blank line, a body. [`Server`] speaks it over TCP on top of a
//! [`Database`](crate::Database); [`Client`] is the matching caller.

pub mod client;
pub mod frame;
pub mod server;

pub use client::Client;
pub use frame::Frame;
pub use server::Server;
