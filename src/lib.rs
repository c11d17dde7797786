//! Focus Guard
//!
//! Blocks a chosen set of distracting platforms for a fixed number of hours, then
//! gates the unlock behind a one-time code that only appears after a mandatory wait.

pub mod catalog;
pub mod config;
pub mod focus;
pub mod gateway;
pub mod storage;
