//! Local media capture and session state
//!
//! Device access lives behind the [`DeviceProvider`] seam; the
//! [`MediaSessionManager`] owns the acquired tracks and keeps every
//! live peer connection fed through device switches.

pub mod devices;
pub mod session;

pub use devices::{DeviceInfo, DeviceProvider, SyntheticDeviceProvider, TrackKind};
pub use session::{LocalTracks, MediaSessionManager};
