//! fawscan: fall armyworm detection service.
//!
//! Images arrive over HTTP, run through a YOLO detector, and feed an
//! in-memory session tally, two SQLite stores and a server-sent-event push
//! channel. `main.rs` wires the pieces; integration tests drive the router
//! built by [`subsystems::comms::axum_channel::build_router`].

pub mod config;
pub mod detector;
pub mod error;
pub mod imaging;
pub mod logger;
pub mod stores;
pub mod stream;
pub mod subsystems;
pub mod tally;
