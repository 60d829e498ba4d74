//! Process-wide side table mapping tokens to stream sources
//!
//! The codec engine calls back into Rust through plain C function pointers.
//! Each session registers its source here and hands the engine an
//! [`IoBinding`]; the callbacks only hold the token and look the source up
//! again on every read or seek, so a released source fails cleanly instead
//! of dangling.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

use crate::source::StreamSource;

/// Default size of the chunk the engine reads from a source at a time
pub const DEFAULT_IO_BUFFER_SIZE: usize = 16 * 1024;

/// Opaque handle to a registered source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceToken(u64);

impl SourceToken {
    pub fn get(self) -> u64 {
        self.0
    }
}

type SharedSource = Arc<Mutex<Box<dyn StreamSource>>>;

/// Token → source table
pub struct SourceRegistry {
    next: AtomicU64,
    entries: RwLock<HashMap<SourceToken, SharedSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The registry shared by every session in the process
    pub fn global() -> &'static SourceRegistry {
        static GLOBAL: OnceLock<SourceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SourceRegistry::new)
    }

    /// Register a source; it stays reachable until the returned guard drops.
    pub fn register(&'static self, source: Box<dyn StreamSource>) -> Registration {
        let token = SourceToken(self.next.fetch_add(1, Ordering::Relaxed));
        let seekable = source.is_seekable();
        self.entries
            .write()
            .insert(token, Arc::new(Mutex::new(source)));
        debug!(token = token.0, seekable, "Registered stream source");
        Registration {
            registry: self,
            token,
            seekable,
        }
    }

    fn lookup(&self, token: SourceToken) -> io::Result<SharedSource> {
        self.entries.read().get(&token).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no source registered for token {}", token.0),
            )
        })
    }

    pub fn read(&self, token: SourceToken, buf: &mut [u8]) -> io::Result<usize> {
        let source = self.lookup(token)?;
        let mut source = source.lock();
        source.read(buf)
    }

    pub fn seek(&self, token: SourceToken, pos: SeekFrom) -> io::Result<u64> {
        let source = self.lookup(token)?;
        let mut source = source.lock();
        source.seek(pos)
    }

    pub fn len(&self, token: SourceToken) -> Option<u64> {
        let source = self.lookup(token).ok()?;
        let mut source = source.lock();
        source.len()
    }

    pub fn contains(&self, token: SourceToken) -> bool {
        self.entries.read().contains_key(&token)
    }

    /// Number of live registrations
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    fn remove(&self, token: SourceToken) {
        if self.entries.write().remove(&token).is_some() {
            debug!(token = token.0, "Released stream source");
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard owning a registry entry. Dropping it closes the source.
pub struct Registration {
    registry: &'static SourceRegistry,
    token: SourceToken,
    seekable: bool,
}

impl Registration {
    pub fn token(&self) -> SourceToken {
        self.token
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Describe how the engine should bind to this source
    pub fn binding(&self, buffer_size: usize) -> IoBinding {
        IoBinding {
            registry: self.registry,
            token: self.token,
            seekable: self.seekable,
            buffer_size: if buffer_size == 0 {
                DEFAULT_IO_BUFFER_SIZE
            } else {
                buffer_size
            },
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.token);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("token", &self.token)
            .field("seekable", &self.seekable)
            .finish()
    }
}

/// What the engine needs to pull bytes from a registered source.
///
/// Only the token crosses into native code; reads and seeks go back
/// through the registry.
#[derive(Debug, Clone, Copy)]
pub struct IoBinding {
    registry: &'static SourceRegistry,
    pub token: SourceToken,
    pub seekable: bool,
    pub buffer_size: usize,
}

impl IoBinding {
    pub fn registry(&self) -> &'static SourceRegistry {
        self.registry
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.registry.read(self.token, buf)?;
        trace!(token = self.token.0, requested = buf.len(), read = n, "Source read");
        Ok(n)
    }

    pub fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        if !self.seekable {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "source is not seekable",
            ));
        }
        self.registry.seek(self.token, pos)
    }

    pub fn len(&self) -> Option<u64> {
        self.registry.len(self.token)
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("entries", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{self, SequentialSource};
    use std::thread;

    #[test]
    fn registration_routes_reads_and_seeks() {
        let registry = SourceRegistry::global();
        let reg = registry.register(source::memory(b"hello world".to_vec()));
        let io = reg.binding(0);
        assert_eq!(io.buffer_size, DEFAULT_IO_BUFFER_SIZE);
        assert!(io.seekable);
        assert_eq!(io.len(), Some(11));

        let mut buf = [0u8; 5];
        assert_eq!(io.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(io.seek(SeekFrom::Start(6)).unwrap(), 6);
        assert_eq!(io.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn dropping_registration_removes_entry() {
        let registry = SourceRegistry::global();
        let reg = registry.register(source::memory(vec![1, 2, 3]));
        let token = reg.token();
        let io = reg.binding(4096);
        assert!(token.get() > 0);
        assert!(registry.contains(token));

        drop(reg);
        assert!(!registry.contains(token));
        let err = io.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn non_seekable_binding_rejects_seek() {
        let registry = SourceRegistry::global();
        let reg = registry.register(Box::new(SequentialSource::new(&b"abc"[..])));
        let io = reg.binding(1024);
        assert!(!reg.is_seekable());
        let err = io.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn concurrent_registrations_get_distinct_tokens() {
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                thread::spawn(move || {
                    let reg = SourceRegistry::global().register(source::memory(vec![i; 4]));
                    let mut buf = [0u8; 4];
                    reg.binding(0).read(&mut buf).unwrap();
                    assert_eq!(buf, [i; 4]);
                    reg.token()
                })
            })
            .collect();

        let mut tokens: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        tokens.sort_by_key(|t| t.0);
        tokens.dedup();
        assert_eq!(tokens.len(), 8);
        for token in tokens {
            assert!(!SourceRegistry::global().contains(token));
        }
    }
}
