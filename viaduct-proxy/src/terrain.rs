//! Terrain sampling side-channel.
//!
//! Observed on-foot movement contributes coarse points to a spatial
//! grid; snapshots are written to disk so coverage accumulates across
//! runs. Never on the forwarding hot path beyond a read and a
//! per-bucket lock.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{error, info};

/// Grid columns along x.
const GRID_X: usize = 10;
/// Grid columns along z.
const GRID_Z: usize = 12;
/// World bounds covered by the grid.
const MIN_X: f32 = -7168.0;
const MIN_Z: f32 = -5120.0;
/// Cell edge length.
const CELL: f32 = 1024.0;

/// On-disk record framing.
const RECORD_LEAD: u8 = 0xAA;
const RECORD_TAIL: u8 = 0xFF;
const RECORD_LEN: usize = 8;

/// A coarse sampled point.
pub type MeshPos = (i16, i16, i16);

/// The spatial grid of sampled points.
pub struct TerrainStore {
    dir: PathBuf,
    buckets: Vec<Mutex<HashSet<MeshPos>>>,
}

impl TerrainStore {
    /// Create an empty grid persisting under `dir`.
    pub fn new(dir: PathBuf) -> Self {
        let buckets = (0..GRID_X * GRID_Z).map(|_| Mutex::new(HashSet::new())).collect();
        Self { dir, buckets }
    }

    /// Bucket index for a world position. Out-of-bounds positions
    /// clamp to the edge cells.
    pub fn grid_id(x: f32, z: f32) -> usize {
        let xi = (((x - MIN_X) / CELL) as isize).clamp(0, GRID_X as isize - 1) as usize;
        let zi = (((z - MIN_Z) / CELL) as isize).clamp(0, GRID_Z as isize - 1) as usize;
        xi * GRID_Z + zi
    }

    /// Add one sample.
    pub fn record(&self, x: f32, y: f32, z: f32) {
        let gid = Self::grid_id(x, z);
        let mut bucket = self.buckets[gid].lock().unwrap_or_else(|e| e.into_inner());
        bucket.insert((x as i16, y as i16, z as i16));
    }

    /// Points currently held (all buckets).
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    /// Whether no points are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge every `grid_<gid>.terr` file found under the store dir.
    pub fn load(&self) {
        for gid in 0..self.buckets.len() {
            let path = self.dir.join(format!("grid_{gid}.terr"));
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    error!("[terrain] load {} failed: {e}", path.display());
                    continue;
                }
            };
            let mut bucket = self.buckets[gid].lock().unwrap_or_else(|e| e.into_inner());
            for record in data.chunks_exact(RECORD_LEN) {
                if record[0] != RECORD_LEAD || record[7] != RECORD_TAIL {
                    error!("[terrain] bad record framing in {}", path.display());
                    break;
                }
                bucket.insert((
                    i16::from_be_bytes([record[1], record[2]]),
                    i16::from_be_bytes([record[3], record[4]]),
                    i16::from_be_bytes([record[5], record[6]]),
                ));
            }
        }
        info!("[terrain] loaded {} points", self.len());
    }

    /// Write every bucket back to disk.
    pub fn save(&self) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!("[terrain] create {} failed: {e}", self.dir.display());
            return;
        }
        for gid in 0..self.buckets.len() {
            let data = {
                let bucket = self.buckets[gid].lock().unwrap_or_else(|e| e.into_inner());
                let mut data = Vec::with_capacity(bucket.len() * RECORD_LEN);
                for (x, y, z) in bucket.iter() {
                    data.push(RECORD_LEAD);
                    data.extend_from_slice(&x.to_be_bytes());
                    data.extend_from_slice(&y.to_be_bytes());
                    data.extend_from_slice(&z.to_be_bytes());
                    data.push(RECORD_TAIL);
                }
                data
            };
            let path = self.dir.join(format!("grid_{gid}.terr"));
            if let Err(e) = std::fs::write(&path, data) {
                error!("[terrain] save {} failed: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> TerrainStore {
        let dir = std::env::temp_dir().join(format!("viaduct-terrain-{tag}-{}", std::process::id()));
        TerrainStore::new(dir)
    }

    #[test]
    fn grid_ids_cover_the_bounds() {
        assert_eq!(TerrainStore::grid_id(MIN_X, MIN_Z), 0);
        assert_eq!(TerrainStore::grid_id(MIN_X + CELL, MIN_Z), GRID_Z);
        assert_eq!(TerrainStore::grid_id(3071.0, 7167.0), GRID_X * GRID_Z - 1);
        // Outside the bounds clamps instead of panicking.
        assert_eq!(TerrainStore::grid_id(-99999.0, -99999.0), 0);
        assert_eq!(TerrainStore::grid_id(99999.0, 99999.0), GRID_X * GRID_Z - 1);
    }

    #[test]
    fn points_deduplicate_per_cell() {
        let store = temp_store("dedup");
        store.record(100.2, 50.0, 200.9);
        store.record(100.7, 50.4, 200.1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_load_round_trip() {
        let store = temp_store("roundtrip");
        store.record(-2000.0, 312.0, 4096.0);
        store.record(1500.0, -1.0, -5000.0);
        store.save();

        let fresh = TerrainStore::new(store.dir.clone());
        fresh.load();
        assert_eq!(fresh.len(), 2);

        let _ = std::fs::remove_dir_all(&store.dir);
    }
}
