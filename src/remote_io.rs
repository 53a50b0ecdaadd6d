//! `RemoteIO`: a `Read + Seek` view of the whole logical remote file, backed
//! by a single [`PartialBuffer`] window that is replaced on demand.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::RemoteZipError;
use crate::partial_buffer::{PartialBuffer, SeekOutcome};
use crate::range::RangeSpec;
use crate::range_fetcher::RangeFetcher;

/// Default size of the first probe fetch used to locate the end-of-central-
/// directory record, matching the original implementation's default.
pub const DEFAULT_INITIAL_BUFFER_SIZE: u64 = 64 * 1024;

/// Operations a seekable source must expose beyond `Read + Seek`, mirroring
/// what the original duck-typed file object gave the ZIP parser.
pub trait SeekableSource: Read + Seek {
    fn tell(&mut self) -> io::Result<u64>;
    fn seekable(&self) -> bool;
    fn close(&mut self);
}

fn out_of_bound(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, RemoteZipError::OutOfBound(msg.into()))
}

/// A seekable view of the whole remote archive, lazily fetching bounded byte
/// ranges as the ZIP parser seeks/reads around it.
pub struct RemoteIO {
    fetcher: Box<dyn RangeFetcher + Send>,
    initial_buffer_size: u64,
    buffer: Option<PartialBuffer>,
    file_size: Option<u64>,
    /// Whether the most recent seek landed inside the current buffer's
    /// window. `false` means the next read must first materialize a new
    /// buffer.
    seek_succeeded: bool,
    /// member header offset -> distance to the next member (or to the
    /// central directory start for the last member). Absent until the
    /// facade installs it once the central directory has been read.
    position_to_size: Option<BTreeMap<u64, u64>>,
    /// The most recent key of `position_to_size` a read started at.
    last_member_pos: Option<u64>,
}

impl RemoteIO {
    pub fn new(fetcher: Box<dyn RangeFetcher + Send>) -> Self {
        Self::with_initial_buffer_size(fetcher, DEFAULT_INITIAL_BUFFER_SIZE)
    }

    pub fn with_initial_buffer_size(
        fetcher: Box<dyn RangeFetcher + Send>,
        initial_buffer_size: u64,
    ) -> Self {
        RemoteIO {
            fetcher,
            initial_buffer_size,
            buffer: None,
            file_size: None,
            seek_succeeded: false,
            position_to_size: None,
            last_member_pos: None,
        }
    }

    /// Install the member position→size map computed from the central
    /// directory. Installed once, after construction, and treated as
    /// immutable thereafter.
    pub fn set_position_to_size(&mut self, map: BTreeMap<u64, u64>) {
        self.position_to_size = Some(map);
    }

    /// The logical file length, if it has been discovered yet (by the first
    /// seek-from-end).
    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    fn logical_position(&self) -> u64 {
        self.buffer.as_ref().map(|b| b.tell()).unwrap_or(0)
    }

    fn bootstrap(&mut self) -> io::Result<()> {
        log::info!(
            "bootstrapping RemoteIO: fetching initial suffix of {} bytes",
            self.initial_buffer_size
        );
        let pb = self
            .fetcher
            .fetch(RangeSpec::Suffix(self.initial_buffer_size), false)
            .map_err(io::Error::from)?;
        self.file_size = Some(pb.offset() + pb.size());
        self.buffer = Some(pb);
        Ok(())
    }

    /// Decide the next fetch range for a cross-window read of `want` bytes
    /// starting at logical position `p`.
    fn choose_fetch(&mut self, p: u64, want: u64) -> io::Result<(RangeSpec, bool)> {
        match &self.position_to_size {
            None => {
                // Still parsing headers/central directory: small, fully
                // buffered probe fetch.
                Ok((RangeSpec::Bounded(p, p + want.max(1) - 1), false))
            }
            Some(map) => {
                if let Some(&member_size) = map.get(&p) {
                    self.last_member_pos = Some(p);
                    Ok((RangeSpec::Bounded(p, p + member_size - 1), true))
                } else if let Some(last) = self.last_member_pos {
                    let member_size = map[&last];
                    if last < p && p < last + member_size {
                        let fetch_size = member_size - (p - last);
                        Ok((RangeSpec::Bounded(p, p + fetch_size - 1), true))
                    } else {
                        Err(out_of_bound(format!(
                            "attempt to read at 0x{p:x}, outside boundary of current zip member"
                        )))
                    }
                } else {
                    Err(out_of_bound(format!(
                        "attempt to read at 0x{p:x} before any zip member has been located"
                    )))
                }
            }
        }
    }
}

impl Read for RemoteIO {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.seek_succeeded {
            let p = self.logical_position();
            let (range, stream) = self.choose_fetch(p, buf.len() as u64)?;
            log::debug!("RemoteIO: cross-window read at 0x{p:x}, fetching {range:?} stream={stream}");
            let new_buffer = self.fetcher.fetch(range, stream).map_err(io::Error::from)?;
            if let Some(old) = self.buffer.take() {
                old.close();
            }
            self.buffer = Some(new_buffer);
            self.seek_succeeded = true;
        }
        self.buffer.as_mut().expect("buffer installed above").read(buf)
    }
}

impl Seek for RemoteIO {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if matches!(pos, SeekFrom::End(_)) && self.file_size.is_none() {
            self.bootstrap()?;
        }
        if self.buffer.is_none() {
            // No bootstrap happened (the first ever call wasn't a
            // seek-from-end). Establish an initial window so later reads
            // have something to fall back on.
            self.bootstrap()?;
        }
        let buffer = self.buffer.as_mut().expect("bootstrapped above");
        match buffer.seek(pos)? {
            SeekOutcome::InWindow(p) => {
                self.seek_succeeded = true;
                Ok(p)
            }
            SeekOutcome::OutOfWindow(p) => {
                // Not an error: the next read will materialize a fresh
                // buffer for wherever this landed.
                self.seek_succeeded = false;
                Ok(p)
            }
        }
    }
}

impl SeekableSource for RemoteIO {
    fn tell(&mut self) -> io::Result<u64> {
        Ok(self.logical_position())
    }

    fn seekable(&self) -> bool {
        true
    }

    fn close(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.close();
        }
    }
}

impl Drop for RemoteIO {
    fn drop(&mut self) {
        SeekableSource::close(self);
    }
}
