//! Distance utility
//!
//! Pure functions converting world pixel coordinates to a tile-unit
//! distance and mapping that distance onto a playback volume curve.

/// Euclidean distance between two world positions, in tile units.
///
/// # Arguments
///
/// * `ax`, `ay` - first position in world pixel units
/// * `bx`, `by` - second position in world pixel units
/// * `tile_size` - side length of one tile in pixels
pub fn tile_distance(ax: f32, ay: f32, bx: f32, by: f32, tile_size: f32) -> f32 {
    let dx = ax - bx;
    let dy = ay - by;
    (dx * dx + dy * dy).sqrt() / tile_size
}

/// Map a tile-unit distance onto a playback volume.
///
/// Full volume (1.0) within `full_radius`, linear fade to 0.0 between
/// `full_radius` and `off_radius`, silent beyond `off_radius`.
pub fn proximity_volume(distance_tiles: f32, full_radius: f32, off_radius: f32) -> f32 {
    if distance_tiles <= full_radius {
        1.0
    } else if distance_tiles >= off_radius {
        0.0
    } else {
        1.0 - (distance_tiles - full_radius) / (off_radius - full_radius)
    }
}
