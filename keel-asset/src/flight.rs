use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Condvar, Mutex},
};

/// In-progress set keyed by resolved cache path.
///
/// The first worker to enter a key processes it; workers racing on the same
/// key block until the first finishes and then observe the freshly written
/// artifact through the normal cache-hit path. Distinct keys never contend.
pub struct SingleFlight {
    in_progress: Mutex<HashSet<PathBuf>>,
    release: Condvar,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            in_progress: Mutex::new(HashSet::new()),
            release: Condvar::new(),
        }
    }

    pub fn enter(&self, key: &Path) -> FlightGuard<'_> {
        let mut set = self.in_progress.lock().unwrap();
        while set.contains(key) {
            set = self.release.wait(set).unwrap();
        }
        set.insert(key.to_path_buf());
        FlightGuard {
            owner: self,
            key: key.to_path_buf(),
        }
    }
}

pub struct FlightGuard<'a> {
    owner: &'a SingleFlight,
    key: PathBuf,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.owner.in_progress.lock().unwrap();
        set.remove(&self.key);
        self.owner.release.notify_all();
    }
}
