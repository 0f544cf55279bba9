//! Shared client registry: a well-known mapping two unrelated processes
//! use to discover each other by name (spec.md §4.8).
//!
//! Grounded in `flux-ipc/src/lib.rs`'s named-`shm_open` convention for
//! resolving a logical name to a filesystem-backed mapping, combined with
//! [`NamedMutex`] for the append serialization the teacher's single-writer
//! rings never needed (a ring only ever has one producer; the registry has
//! many).

use std::fs::OpenOptions;
use std::path::PathBuf;

use memmap2::MmapMut;

use particle_core::error::{ParticleError, Result};

use crate::mutex::NamedMutex;

/// Size of the well-known registry mapping (spec.md §4.8).
pub const REGISTRY_SIZE: usize = 64 * 1024;
const ID_LEN: usize = 16;

/// Shared registry mapping plus its guarding named mutex.
pub struct Registry {
    mmap: MmapMut,
    mutex: NamedMutex,
}

impl Registry {
    /// Open (creating if absent) the registry mapping for `base_name`
    /// under `base_dir`.
    pub fn open(base_dir: &PathBuf, base_name: &str) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let path = base_dir.join(format!("{base_name}.registry"));
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            file.set_len(REGISTRY_SIZE as u64)?;
        }
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let mutex = NamedMutex::open(base_dir, &format!("{base_name}.registry"))?;
        Ok(Self { mmap, mutex })
    }

    /// Append `id` (a 16-char uppercase hex identifier) to the registry
    /// under the mutex. Fails if the region has no room left.
    pub fn append(&mut self, id: &str) -> Result<()> {
        if id.len() != ID_LEN || !id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_lowercase()) {
            return Err(ParticleError::config("registry identifiers must be 16-char uppercase hex"));
        }
        let line = format!("{id}\n");
        // SAFETY: `append` holds `&mut self`, so no other code in this
        // process touches `self.mmap` concurrently; the raw pointer lets
        // the write happen inside the lock closure alongside the read
        // that decided the slot, so two appenders can never compute the
        // same offset and both write to it.
        let ptr = self.mmap.as_mut_ptr();
        let len = self.mmap.len();
        self.mutex.with_lock(|| {
            let region = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
            let end = first_null_offset(region);
            if end + line.len() > len {
                return Err(ParticleError::ResourceExhausted { resource: "shared registry" });
            }
            region[end..end + line.len()].copy_from_slice(line.as_bytes());
            Ok(())
        })
    }

    /// Snapshot every identifier currently committed to the registry.
    pub fn snapshot(&mut self) -> Result<Vec<String>> {
        self.mutex.with_lock(|| {
            let end = first_null_offset(&self.mmap);
            let text = std::str::from_utf8(&self.mmap[..end])
                .map_err(|_| ParticleError::protocol("registry contains non-UTF8 bytes"))?;
            Ok(text.lines().map(str::to_owned).collect())
        })
    }
}

fn first_null_offset(mmap: &[u8]) -> usize {
    mmap.iter().position(|&b| b == 0).unwrap_or(mmap.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("particle-ipc-registry-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn append_then_snapshot_round_trips() {
        let dir = scratch_dir("roundtrip");
        let mut registry = Registry::open(&dir, "base").unwrap();
        registry.append("0011223344556677").unwrap();
        registry.append("AABBCCDDEEFF0011").unwrap();

        let ids = registry.snapshot().unwrap();
        assert_eq!(ids, vec!["0011223344556677", "AABBCCDDEEFF0011"]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_malformed_identifiers() {
        let dir = scratch_dir("malformed");
        let mut registry = Registry::open(&dir, "base").unwrap();
        assert!(registry.append("not-hex-at-all!!").is_err());
        assert!(registry.append("short").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_appends_from_many_processes_never_corrupt_earlier_entries() {
        let dir = scratch_dir("concurrent");
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let dir = dir.clone();
            handles.push(std::thread::spawn(move || {
                let mut registry = Registry::open(&dir, "base").unwrap();
                registry.append(&format!("{i:016X}")).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut registry = Registry::open(&dir, "base").unwrap();
        let ids = registry.snapshot().unwrap();
        assert_eq!(ids.len(), 8);
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 8);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
