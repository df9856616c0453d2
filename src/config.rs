//! Engine construction parameters.

use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;
const DEFAULT_MERGE_INTERVAL: Duration = Duration::from_secs(12 * 3600);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dir: PathBuf,
    pub max_file_size: u64,
    /// Carried as data for an external scheduler — the engine itself never
    /// schedules a merge, it only runs one when asked (see `Engine::merge`).
    pub merge_interval: Duration,
    pub fsync: bool,
}

impl EngineConfig {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        EngineConfig {
            dir: dir.as_ref().to_path_buf(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            merge_interval: DEFAULT_MERGE_INTERVAL,
            fsync: false,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_merge_interval(mut self, merge_interval: Duration) -> Self {
        self.merge_interval = merge_interval;
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_test() {
        let cfg = EngineConfig::new("/tmp/does-not-matter");
        assert_eq!(cfg.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(cfg.merge_interval, DEFAULT_MERGE_INTERVAL);
        assert!(!cfg.fsync);
    }

    #[test]
    fn builder_overrides_test() {
        let cfg = EngineConfig::new("/tmp/x")
            .with_max_file_size(64)
            .with_fsync(true)
            .with_merge_interval(Duration::from_secs(60));
        assert_eq!(cfg.max_file_size, 64);
        assert!(cfg.fsync);
        assert_eq!(cfg.merge_interval, Duration::from_secs(60));
    }
}
