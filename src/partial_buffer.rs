//! A bounded window `[offset, offset+size)` over the logical remote file,
//! backed by the bytes of a single range fetch.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// The outcome of a seek against a [`PartialBuffer`]. Out-of-window seeks are
/// not an error in the usual sense: the logical position is still updated,
/// and [`RemoteIO`](crate::remote_io::RemoteIO) uses that updated position to
/// decide where the next fetch should start. Modeled as a plain two-variant
/// result rather than an exception, per the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The new position lies within `[offset, offset+size)`.
    InWindow(u64),
    /// The new position lies outside the window. The logical position was
    /// still updated to this value.
    OutOfWindow(u64),
}

impl SeekOutcome {
    /// The logical position after the seek, regardless of whether it landed
    /// in or out of the window.
    pub fn position(self) -> u64 {
        match self {
            SeekOutcome::InWindow(p) | SeekOutcome::OutOfWindow(p) => p,
        }
    }

    pub fn in_window(self) -> bool {
        matches!(self, SeekOutcome::InWindow(_))
    }
}

enum Source {
    /// Fully-buffered, randomly-seekable bytes (probe fetches).
    Buffered(Cursor<Vec<u8>>),
    /// A one-shot forward-only byte stream (member-streaming fetches), with
    /// the number of bytes consumed from it so far.
    Streaming(Box<dyn Read + Send>, u64),
}

/// A window over the logical file, covering `[offset, offset+size)`, wrapping
/// the bytes (or stream) obtained from one [`RangeFetcher`](crate::range_fetcher::RangeFetcher)
/// call.
pub struct PartialBuffer {
    source: Source,
    offset: u64,
    size: u64,
    position: u64,
}

fn checked_add_signed(base: u64, delta: i64) -> io::Result<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub((-delta) as u64)
    }
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek position overflowed"))
}

impl PartialBuffer {
    /// Build a window over fully-buffered bytes (a probe fetch).
    pub fn buffered(data: Vec<u8>, offset: u64) -> Self {
        let size = data.len() as u64;
        PartialBuffer {
            source: Source::Buffered(Cursor::new(data)),
            offset,
            size,
            position: offset,
        }
    }

    /// Build a window over a forward-only stream (a member-streaming fetch).
    /// `size` is the advertised window length (from `Content-Range`); the
    /// stream itself is not assumed to be exactly that long.
    pub fn streaming(reader: Box<dyn Read + Send>, offset: u64, size: u64) -> Self {
        PartialBuffer {
            source: Source::Streaming(reader, 0),
            offset,
            size,
            position: offset,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.source, Source::Streaming(..))
    }

    /// The current absolute logical position of the next byte to be read.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Bytes remaining in the window from the current position to its end.
    pub fn remaining(&self) -> u64 {
        (self.offset + self.size).saturating_sub(self.position)
    }

    /// Release the underlying source (connection or in-memory buffer).
    pub fn close(self) {
        // Dropping `self` releases the underlying Cursor/stream.
    }

    /// Seek within the logical file. See [`SeekOutcome`] for how out-of-window
    /// targets are reported.
    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<SeekOutcome> {
        let new_position = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::End(delta) => checked_add_signed(self.offset + self.size, delta)?,
            SeekFrom::Current(delta) => checked_add_signed(self.position, delta)?,
        };
        self.position = new_position;

        let relative = new_position as i128 - self.offset as i128;
        if relative < 0 || relative as u64 >= self.size {
            return Ok(SeekOutcome::OutOfWindow(self.position));
        }
        let relative = relative as u64;

        match &mut self.source {
            Source::Buffered(cursor) => {
                cursor.set_position(relative);
            }
            Source::Streaming(reader, local_pos) => {
                if relative < *local_pos {
                    // Negative seek on a forward-only stream: not supported.
                    return Ok(SeekOutcome::OutOfWindow(self.position));
                }
                let skip = relative - *local_pos;
                if skip > 0 {
                    let copied = io::copy(&mut reader.take(skip), &mut io::sink())?;
                    *local_pos += copied;
                    if copied != skip {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream ended while skipping ahead to seek target",
                        ));
                    }
                }
            }
        }
        Ok(SeekOutcome::InWindow(self.position))
    }
}

impl Read for PartialBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let mut total = 0;
        while total < want {
            let n = match &mut self.source {
                Source::Buffered(cursor) => cursor.read(&mut buf[total..want])?,
                Source::Streaming(reader, local_pos) => {
                    let n = reader.read(&mut buf[total..want])?;
                    *local_pos += n as u64;
                    n
                }
            };
            if n == 0 {
                break;
            }
            total += n;
        }
        self.position += total as u64;
        Ok(total)
    }
}
