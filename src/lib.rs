//! HTTP service that downloads YouTube videos through an external client.
//!
//! The crate is organized the way the routes consume it: [`watch_url`]
//! validates input, [`client`] talks to the video platform, [`download`]
//! orchestrates the two and [`routes`] exposes the results over HTTP.

pub mod client;
pub mod download;
pub mod error;
pub mod routes;
pub mod slug;
pub mod watch_url;
