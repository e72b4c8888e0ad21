//! Stash options supplied by the owning distributed object.
//!
//! All values have defaults. Override via environment variables (prefixed
//! `DIST_ASSEMBLY_`), through serde, or by constructing `StashOptions`.

/// Construction-time options of a distributed object's stashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StashOptions {
    /// Initial stash size in scalars. One value applies to every rank; a
    /// longer list is indexed by rank.
    pub initial_size: Vec<usize>,

    /// Drop entries destined for other ranks instead of stashing them.
    pub ignore_off_process_entries: bool,
}

impl StashOptions {
    /// Load options from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `DIST_ASSEMBLY_STASH_INITIAL_SIZE` (comma separated, one per rank)
    /// - `DIST_ASSEMBLY_IGNORE_OFF_PROCESS` (`1`/`true`)
    pub fn from_env() -> Self {
        let mut opts = Self::default();

        if let Ok(v) = std::env::var("DIST_ASSEMBLY_STASH_INITIAL_SIZE") {
            let sizes: Result<Vec<usize>, _> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            match sizes {
                Ok(sizes) => opts.initial_size = sizes,
                Err(e) => log::warn!("ignoring DIST_ASSEMBLY_STASH_INITIAL_SIZE={v:?}: {e}"),
            }
        }
        if let Ok(v) = std::env::var("DIST_ASSEMBLY_IGNORE_OFF_PROCESS") {
            opts.ignore_off_process_entries = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }

        opts
    }

    /// Initial size for `rank`, if one was given for it.
    pub fn initial_size_for(&self, rank: usize) -> Option<usize> {
        match self.initial_size.as_slice() {
            [] => None,
            [all] => Some(*all),
            list => list.get(rank).copied(),
        }
    }
}
