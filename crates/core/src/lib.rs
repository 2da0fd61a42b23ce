//! Core data types and pure utilities for the copresence virtual office
//!
//! This crate holds the leaf pieces shared by the orchestration layer:
//!
//! - **World state**: [`PlayerSnapshot`] and the [`PlayerDirectory`] trait
//!   through which the authoritative multiplayer state is read each tick.
//! - **Distance utility**: world-pixel to tile-unit distance and the
//!   distance-to-volume curve.
//! - **Local settings**: persisted device preferences loaded at session
//!   start.
//!
//! Everything here is synchronous and has no networking dependencies.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod distance;
pub mod error;
pub mod settings;
pub mod world;

pub use distance::{proximity_volume, tile_distance};
pub use error::{Error, Result};
pub use settings::LocalSettings;
pub use world::{PeerId, PlayerDirectory, PlayerSnapshot};
