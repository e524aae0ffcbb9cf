//! State threaded through one run.

use super::cache::ChecksumCache;

/// The checksum cache plus the run-wide `changed` flag.
///
/// `changed` is set whenever a binary is staged, a digest is added to the
/// cache, or a completion file is written with new content.
#[derive(Debug)]
pub struct RunContext {
    cache: ChecksumCache,
    changed: bool,
}

impl RunContext {
    pub fn new(cache: ChecksumCache) -> Self {
        Self {
            cache,
            changed: false,
        }
    }

    pub fn cache(&self) -> &ChecksumCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ChecksumCache {
        &mut self.cache
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn into_cache(self) -> ChecksumCache {
        self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::types::Sha256Digest;

    #[test]
    fn test_starts_unchanged() {
        let mut ctx = RunContext::new(ChecksumCache::empty("checksums.yml"));
        assert!(!ctx.changed());

        ctx.cache_mut().insert("a-1-linux-x86_64", Sha256Digest::from_hex("ab"));
        // Cache writes do not flip the flag on their own.
        assert!(!ctx.changed());

        ctx.mark_changed();
        assert!(ctx.changed());
        assert_eq!(ctx.into_cache().len(), 1);
    }
}
