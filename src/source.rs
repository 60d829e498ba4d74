//! Byte stream sources feeding the demuxer

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::error::{DecoderError, Result};

/// User agent sent with network source requests
const USER_AGENT: &str = concat!("videcoder/", env!("CARGO_PKG_VERSION"));

/// A blocking byte stream the demuxer pulls from.
///
/// Only `read` is mandatory. Sources that can reposition override
/// `is_seekable`/`seek`; the demuxer is then given a seek callback and
/// the session accepts `seek` requests.
pub trait StreamSource: Send {
    /// Read into `buf`, returning the byte count; 0 means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source is not seekable",
        ))
    }

    /// Total length in bytes, when known
    fn len(&mut self) -> Option<u64> {
        None
    }
}

/// Source over any `Read + Seek`
pub struct SeekableSource<R> {
    inner: R,
    len: Option<u64>,
}

impl<R: Read + Seek + Send> SeekableSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, len: None }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek + Send> StreamSource for SeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    fn len(&mut self) -> Option<u64> {
        if self.len.is_none() {
            let current = self.inner.stream_position().ok()?;
            let end = self.inner.seek(SeekFrom::End(0)).ok()?;
            self.inner.seek(SeekFrom::Start(current)).ok()?;
            self.len = Some(end);
        }
        self.len
    }
}

/// Forward-only source over any `Read`
pub struct SequentialSource<R> {
    inner: R,
}

impl<R: Read + Send> SequentialSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send> StreamSource for SequentialSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// In-memory source
pub fn memory(data: Vec<u8>) -> Box<dyn StreamSource> {
    Box::new(SeekableSource::new(Cursor::new(data)))
}

/// Open a file as a seekable source
pub fn file(path: impl AsRef<Path>) -> Result<Box<dyn StreamSource>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
    debug!("Opened file source {}", path.display());
    Ok(Box::new(SeekableSource::new(BufReader::new(file))))
}

/// Open an HTTP(S) URL as a forward-only source
pub fn url(url: &str) -> Result<Box<dyn StreamSource>> {
    let response = ureq::get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| DecoderError::Source(format!("{}: {}", url, e)))?;
    debug!(
        status = response.status(),
        content_type = response.content_type(),
        "Opened network source {}",
        url
    );
    Ok(Box::new(SequentialSource::new(response.into_reader())))
}
