use parking_lot::Mutex;

/// Hook for dropping cached query results after a repair rewrites a row
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, key: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheInvalidator;

impl CacheInvalidator for NoopCacheInvalidator {
    fn invalidate(&self, _key: &str) {}
}

/// Keeps every invalidated key, in order
#[derive(Debug, Default)]
pub struct RecordingCacheInvalidator {
    keys: Mutex<Vec<String>>,
}

impl RecordingCacheInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }
}

impl CacheInvalidator for RecordingCacheInvalidator {
    fn invalidate(&self, key: &str) {
        self.keys.lock().push(key.to_string());
    }
}
