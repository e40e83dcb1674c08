//! # tether
//!
//! Command-line front end for `tether-core`. One binary plays either side
//! of the bridge:
//!
//! - **Host**: publishes the frame rate, keeps the keep-alive record
//!   fresh, receives video and audio and logs per-second statistics.
//! - **Extension**: stands in for the broadcast extension, feeding a
//!   synthetic test pattern and silent audio into the bridge.
//!
//! Both sides find each other through the shared container directory
//! named in the configuration.

pub mod config;
pub mod service;
