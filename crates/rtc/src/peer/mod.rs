//! Peer connection establishment and lifecycle

pub mod connection;
pub mod manager;

pub use connection::{ConnectionState, PeerConnection};
pub use manager::{initiates, PeerManager};
