//! Single-pass gzip wrapper around the archive stream

use crate::error::{StowawayError, StowawayResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Default gzip level used when the configuration does not override it
pub const DEFAULT_LEVEL: u32 = 6;

/// Streaming gzip compressor
///
/// The stream is only complete once [`Compressor::finish`] has returned;
/// a dropped compressor leaves a truncated, unusable artifact.
pub struct Compressor<W: Write> {
    encoder: GzEncoder<W>,
}

impl<W: Write> Compressor<W> {
    pub fn new(sink: W, level: u32) -> Self {
        Self {
            encoder: GzEncoder::new(sink, Compression::new(level.min(9))),
        }
    }

    /// Write the gzip trailer, flush, and hand back the sink
    pub fn finish(self) -> StowawayResult<W> {
        let mut sink = self
            .encoder
            .finish()
            .map_err(|e| StowawayError::archive("finishing gzip stream", e))?;
        sink.flush()
            .map_err(|e| StowawayError::archive("flushing compressed archive", e))?;
        Ok(sink)
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

/// Streaming gzip decompressor for a downloaded artifact
pub fn decompress<R: Read>(source: R) -> GzDecoder<R> {
    GzDecoder::new(source)
}
