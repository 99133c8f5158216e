use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::paths::base_name;

/// Base names known to be present locally or already queued for download.
///
/// Seeded once from the local directory and only grown afterwards. A name is
/// claimed when its key is detected, before the download finishes, so a key
/// is never queued twice even while its first download is in flight.
#[derive(Debug, Default)]
pub struct LocalIndex {
    names: Mutex<HashSet<String>>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes regular files directly under `dir`. Subdirectories, the
    /// download staging directory among them, are not descended into.
    pub async fn scan(dir: &Path) -> io::Result<Self> {
        let mut names = HashSet::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            // Follows symlinks, a link to a regular file counts as present.
            let Ok(metadata) = tokio::fs::metadata(entry.path()).await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            names.insert(name);
        }
        Ok(Self {
            names: Mutex::new(names),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the keys whose base names were not yet known, in input order,
    /// and records those names. The whole check-then-insert runs under one
    /// lock, so overlapping callers never both claim the same name.
    pub fn claim_new<I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut names = self.lock();
        keys.into_iter()
            .filter(|key| match base_name(key) {
                Some(name) => names.insert(name.to_owned()),
                None => false,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::transfer::STAGING_DIR;
    use tempfile::tempdir;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn scan_indexes_files_only() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), b"a").unwrap();
        std::fs::write(dir.path().join("b.json.partial"), b"b").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.json"), b"c").unwrap();
        let staging = dir.path().join(STAGING_DIR);
        std::fs::create_dir(&staging).unwrap();
        std::fs::write(staging.join("d.json"), b"d").unwrap();

        let index = LocalIndex::scan(dir.path()).await.unwrap();

        assert_eq!(index.len(), 2);
        assert!(index.contains("a.json"));
        assert!(index.contains("b.json.partial"));
        assert!(!index.contains("d.json"));
        assert!(!index.contains("nested"));
        assert!(!index.contains("c.json"));
    }

    #[test]
    fn claim_new_skips_known_and_repeated_names() {
        let index = LocalIndex::new();
        let first = index.claim_new(keys(&["p/a.json", "p/b.json", "p/sub/a.json", "p/"]));
        assert_eq!(first, keys(&["p/a.json", "p/b.json"]));

        let second = index.claim_new(keys(&["p/a.json", "p/b.json", "p/c.json"]));
        assert_eq!(second, keys(&["p/c.json"]));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn identical_listing_yields_nothing_new() {
        let index = LocalIndex::new();
        let listing = keys(&["p/a.json", "p/b.json"]);
        assert_eq!(index.claim_new(listing.clone()).len(), 2);
        assert!(index.claim_new(listing).is_empty());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn concurrent_claims_never_share_a_key() {
        let index = std::sync::Arc::new(LocalIndex::new());
        let listing: Vec<String> = (0..500).map(|i| format!("p/{i}.json")).collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let index = std::sync::Arc::clone(&index);
                let listing = listing.clone();
                std::thread::spawn(move || index.claim_new(listing))
            })
            .collect();

        let mut claimed: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        claimed.sort();
        let mut expected = listing;
        expected.sort();
        assert_eq!(claimed, expected);
    }
}
