use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use log::debug;
use parking_lot::Mutex;
use crate::scan::Candidate;

/// Paths already dispositioned during this run.
///
/// Memory only: a restart starts from an empty set.
#[derive(Debug, Default)]
pub struct SkipSet {
    paths: Mutex<HashSet<PathBuf>>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    /// Atomically check and insert. Returns false when the path was already claimed.
    pub fn claim(&self, path: &Path) -> bool {
        self.paths.lock().insert(path.to_path_buf())
    }

    /// Give a claim back so the path can be offered again later in the run
    pub fn release(&self, path: &Path) -> bool {
        self.paths.lock().remove(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// Offer candidates in order to `predicate` and return the first accepted.
    ///
    /// Each candidate is claimed before its evaluation starts and stays
    /// claimed whatever the outcome, so two concurrent pickers can never
    /// evaluate the same path. The predicate runs outside the lock.
    pub async fn pick_path<T, F, Fut>(
        &self,
        candidates: Vec<Candidate>,
        mut predicate: F,
    ) -> Option<(Candidate, T)>
    where
        F: FnMut(Candidate) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for candidate in candidates {
            if !self.claim(&candidate.path) {
                continue;
            }

            match predicate(candidate.clone()).await {
                Some(selected) => return Some((candidate, selected)),
                None => debug!("Not selected: {}", candidate.path.display()),
            }
        }
        None
    }
}
