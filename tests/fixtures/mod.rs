//! Test fixtures for batch-route-planner.
//!
//! Provides realistic delivery data built from real Manhattan locations.

#![allow(dead_code)]

pub mod nyc_locations;

pub use nyc_locations::*;
