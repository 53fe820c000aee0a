//! Step definitions for message delivery scenarios.

pub mod world;

mod given;
mod then;
mod when;
