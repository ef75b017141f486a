//! Runtime-tunable knobs for the checkpoint core (SPEC_FULL.md §10).
//!
//! This is deliberately small: the core has no CLI of its own (that belongs to the surrounding
//! tool, out of scope per §1), so `Options` only reads a handful of `MC_SNAPSHOT_*` environment
//! variables at construction time, the same override order used by this codebase's own
//! option-parsing module (explicit setter > environment > default).

use std::env;

const ENV_PREFIX: &str = "MC_SNAPSHOT_";

/// Runtime configuration for [`crate::checkpoint::Checkpoint`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Governs the Flat-vs-Chunked decision in region capture (§4.2). When `false`, every
    /// region is captured Flat regardless of size.
    pub sparse_checkpointing: bool,
    /// Whether to use the soft-dirty optimization for parent-snapshot page sharing (§4.5).
    pub soft_dirty: bool,
    /// Regions at or below this size always use Flat storage, regardless of
    /// `sparse_checkpointing`, since per-page bookkeeping would outweigh deduplication.
    pub flat_region_threshold_bytes: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            sparse_checkpointing: true,
            soft_dirty: probe_soft_dirty_support(),
            flat_region_threshold_bytes: crate::util::constants::BYTES_IN_PAGE,
        }
    }
}

impl Options {
    /// Build an `Options` from defaults, overridden by any `MC_SNAPSHOT_*` environment
    /// variables that are set.
    pub fn from_env() -> Self {
        let mut opts = Options::default();

        if let Some(v) = env_bool("SPARSE_CHECKPOINTING") {
            opts.sparse_checkpointing = v;
        }
        if let Some(v) = env_bool("SOFT_DIRTY") {
            opts.soft_dirty = v;
        }
        if let Ok(raw) = env::var(format!("{ENV_PREFIX}FLAT_REGION_THRESHOLD_BYTES")) {
            if let Ok(v) = raw.parse::<usize>() {
                opts.flat_region_threshold_bytes = v;
            } else {
                warn!("ignoring malformed {ENV_PREFIX}FLAT_REGION_THRESHOLD_BYTES={raw:?}");
            }
        }

        opts
    }
}

fn env_bool(name: &str) -> Option<bool> {
    match env::var(format!("{ENV_PREFIX}{name}")) {
        Ok(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            other => {
                warn!("ignoring malformed {ENV_PREFIX}{name}={other:?}");
                None
            }
        },
        Err(_) => None,
    }
}

/// Per Open Question 2 (DESIGN.md): soft-dirty support is probed, not assumed. On a platform
/// where `/proc/self/clear_refs` cannot be opened for writing, the optimization degrades to
/// full re-hashing every snapshot rather than failing.
fn probe_soft_dirty_support() -> bool {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            std::fs::OpenOptions::new()
                .write(true)
                .open("/proc/self/clear_refs")
                .is_ok()
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sparse_checkpointing_is_on() {
        assert!(Options::default().sparse_checkpointing);
    }

    #[test]
    fn test_default_flat_threshold_is_one_page() {
        assert_eq!(
            Options::default().flat_region_threshold_bytes,
            crate::util::constants::BYTES_IN_PAGE
        );
    }
}
