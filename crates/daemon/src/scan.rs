use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;
use crate::config::TranscodeConfig;
use log::{debug, warn};

/// A file eligible by extension, as seen at scan time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Lists eligible files under a root, oldest first.
#[derive(Debug, Clone)]
pub struct CandidateScanner {
    root: PathBuf,
    allowed_inputs: Vec<String>,
    excluded: Vec<PathBuf>,
}

impl CandidateScanner {
    pub fn new(root: impl Into<PathBuf>, allowed_inputs: &[String]) -> Self {
        Self {
            root: root.into(),
            allowed_inputs: allowed_inputs.iter().map(|s| s.to_lowercase()).collect(),
            excluded: Vec::new(),
        }
    }

    /// Scanner over the working tree that never descends into the daemon's
    /// own temporary or destination directories.
    pub fn from_config(cfg: &TranscodeConfig) -> Self {
        let mut scanner = Self::new(&cfg.working_dir, &cfg.allowed_inputs).exclude(cfg.temp_dir());
        if let Some(dest) = &cfg.destination_dir {
            scanner = scanner.exclude(dest);
        }
        scanner
    }

    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Case-insensitive suffix match against the allowed inputs
    pub fn is_allowed(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let name = name.to_lowercase();
        self.allowed_inputs.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }

    /// Walk the tree and return every allowed file, sorted by modification
    /// time ascending. The sort is stable, so ties keep enumeration order.
    pub fn list_candidates(&self) -> Vec<Candidate> {
        if !self.root.exists() {
            warn!("Working directory does not exist: {}", self.root.display());
            return Vec::new();
        }

        let excluded = self.excluded_in_walk();
        let mut candidates = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !excluded.iter().any(|ex| e.path() == ex.as_path()));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.is_allowed(entry.path()) {
                continue;
            }

            // The file may vanish between enumeration and stat
            let modified = match entry.metadata() {
                Ok(meta) => match meta.modified() {
                    Ok(modified) => modified,
                    Err(e) => {
                        debug!("Skipping {}: {}", entry.path().display(), e);
                        continue;
                    }
                },
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            candidates.push(Candidate {
                path: entry.into_path(),
                modified,
            });
        }

        candidates.sort_by_key(|c| c.modified);
        debug!("Scan of {} found {} candidate(s)", self.root.display(), candidates.len());
        candidates
    }

    /// Exclusions spelled the way the walker reports paths under `root`.
    ///
    /// Both sides are canonicalized so any spelling of the same directory
    /// matches. Directories that don't exist yet are kept as given.
    fn excluded_in_walk(&self) -> Vec<PathBuf> {
        let canonical_root = std::fs::canonicalize(&self.root).ok();
        let mut excluded = Vec::with_capacity(self.excluded.len() * 2);
        for path in &self.excluded {
            let walked = canonical_root.as_ref().and_then(|root| {
                let canonical = std::fs::canonicalize(path).ok()?;
                let relative = canonical.strip_prefix(root).ok()?;
                Some(self.root.join(relative))
            });
            excluded.extend(walked);
            excluded.push(path.clone());
        }
        excluded
    }
}

/// Convenience wrapper for a one-off scan
pub fn list_candidates(root: &Path, allowed_inputs: &[String]) -> Vec<Candidate> {
    CandidateScanner::new(root, allowed_inputs).list_candidates()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    }

    fn exts() -> Vec<String> {
        vec![".mkv".to_string(), ".mp4".to_string()]
    }

    #[test]
    fn test_oldest_first_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("new.mkv"), 10);
        touch(&dir.path().join("nested/old.MKV"), 300);
        touch(&dir.path().join("middle.mp4"), 100);
        touch(&dir.path().join("notes.txt"), 1000);
        touch(&dir.path().join("clip.mkv.part"), 1000);

        let names: Vec<_> = list_candidates(dir.path(), &exts())
            .into_iter()
            .map(|c| c.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["old.MKV", "middle.mp4", "new.mkv"]);
    }

    #[test]
    fn test_excluded_directories_are_not_walked() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("keep.mkv"), 10);
        touch(&dir.path().join(".ffdaemon-tmp/0000.partial.mkv"), 10);

        let scanner = CandidateScanner::new(dir.path(), &exts()).exclude(dir.path().join(".ffdaemon-tmp"));
        let found = scanner.list_candidates();
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("keep.mkv"));
    }

    #[test]
    fn test_exclusions_match_other_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("library");
        touch(&library.join("keep.mkv"), 10);
        touch(&library.join("shows/notes.txt"), 10);
        touch(&library.join("out/shows/ep1.mkv"), 10);
        touch(&library.join(".ffdaemon-tmp/0000.partial.mkv"), 10);

        let scanner = CandidateScanner::new(&library, &exts())
            .exclude(library.join("shows/../out"))
            .exclude(dir.path().join("library/./.ffdaemon-tmp"));
        let found = scanner.list_candidates();
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("keep.mkv"));
        assert!(found[0].path.starts_with(&library));
    }

    #[cfg(unix)]
    #[test]
    fn test_exclusion_through_symlinked_root() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("library");
        touch(&library.join("keep.mkv"), 10);
        touch(&library.join("out/ep1.mkv"), 10);
        let alias = dir.path().join("alias");
        std::os::unix::fs::symlink(&library, &alias).unwrap();

        let found = CandidateScanner::new(&alias, &exts()).exclude(library.join("out")).list_candidates();
        assert_eq!(found.len(), 1);
        assert!(found[0].path.starts_with(&alias));
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_candidates(&dir.path().join("gone"), &exts()).is_empty());
    }
}
