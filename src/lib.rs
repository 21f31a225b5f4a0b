//! # NMEA Courier Library
//!
//! Field data-collection agent for serial GPS receivers.
//!
//! This library reassembles NMEA sentences from a serial byte stream, groups
//! the sentences of one fix cycle into a bundle and pushes each bundle to a
//! remote collection service, keeping a local backlog of everything received.

pub mod backlog;
pub mod bundle;
pub mod config;
pub mod courier;
pub mod error;
pub mod serial;
pub mod transport;
