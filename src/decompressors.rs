use crate::{error::Result, HtpStatus};
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Write;

/// Content encoding of a response body.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HtpContentEncoding {
    /// No compression.
    NONE,
    /// Gzip compression.
    GZIP,
    /// Deflate compression, with or without the zlib wrapper.
    DEFLATE,
}

/// Maximum number of decoded bytes produced for one compressed input
/// chunk before the stream is considered a decompression bomb.
const BOMB_LIMIT_PER_CHUNK: usize = 16 * 1024 * 1024;

enum Inner {
    Gzip(GzDecoder<Vec<u8>>),
    /// Deflate bodies are tried with the zlib wrapper first; servers
    /// that send raw deflate are detected on the first chunk and the
    /// decoder is restarted without the wrapper.
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
    /// Decompression failed permanently; input flows through unchanged.
    Passthrough,
}

/// Streaming decompressor for response bodies. Compressed bytes go in
/// through `feed`; decoded bytes come back out of `feed` and `finish`.
pub struct Decompressor {
    inner: Inner,
    first_chunk: bool,
}

impl Decompressor {
    /// Creates a decompressor for the given encoding. NONE is not a
    /// valid argument; the caller routes unencoded bodies directly.
    pub fn new(encoding: HtpContentEncoding) -> Result<Self> {
        let inner = match encoding {
            HtpContentEncoding::GZIP => Inner::Gzip(GzDecoder::new(Vec::new())),
            HtpContentEncoding::DEFLATE => Inner::Zlib(ZlibDecoder::new(Vec::new())),
            HtpContentEncoding::NONE => return Err(HtpStatus::ERROR),
        };
        Ok(Self {
            inner,
            first_chunk: true,
        })
    }

    /// Decompresses one chunk of input, returning the bytes decoded so
    /// far. An error marks the stream as undecodable; the caller decides
    /// whether to pass data through instead.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.first_chunk {
            self.first_chunk = false;
            // A deflate stream without the zlib wrapper fails on its
            // first bytes; retry it raw before giving up.
            if let Inner::Zlib(decoder) = &mut self.inner {
                if decoder.write_all(data).is_err() {
                    let mut raw = DeflateDecoder::new(Vec::new());
                    raw.write_all(data)?;
                    self.inner = Inner::Raw(raw);
                }
                return self.take_decoded();
            }
        }
        match &mut self.inner {
            Inner::Gzip(decoder) => decoder.write_all(data)?,
            Inner::Zlib(decoder) => decoder.write_all(data)?,
            Inner::Raw(decoder) => decoder.write_all(data)?,
            Inner::Passthrough => return Ok(data.to_vec()),
        }
        self.take_decoded()
    }

    /// Signals the end of the compressed stream and returns any decoded
    /// bytes still buffered.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let decoded = match std::mem::replace(&mut self.inner, Inner::Passthrough) {
            Inner::Gzip(decoder) => decoder.finish()?,
            Inner::Zlib(decoder) => decoder.finish()?,
            Inner::Raw(decoder) => decoder.finish()?,
            Inner::Passthrough => Vec::new(),
        };
        Ok(decoded)
    }

    /// Moves decoded bytes out of the inner writer.
    fn take_decoded(&mut self) -> Result<Vec<u8>> {
        let out = match &mut self.inner {
            Inner::Gzip(decoder) => {
                decoder.flush()?;
                std::mem::take(decoder.get_mut())
            }
            Inner::Zlib(decoder) => {
                decoder.flush()?;
                std::mem::take(decoder.get_mut())
            }
            Inner::Raw(decoder) => {
                decoder.flush()?;
                std::mem::take(decoder.get_mut())
            }
            Inner::Passthrough => Vec::new(),
        };
        if out.len() > BOMB_LIMIT_PER_CHUNK {
            return Err(HtpStatus::ERROR);
        }
        Ok(out)
    }
}

// Tests
