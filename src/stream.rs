//! Streaming adapters over raw provider streams.
//!
//! `EncfsWriter` buffers plaintext until a full block accumulates, then
//! encrypts and forwards it; the short tail is emitted on `finish` (or on
//! drop, best effort). `EncfsReader` decrypts block-by-block and serves
//! forward sequential reads. Both read/write the masked header IV when the
//! volume uses unique IVs.

use std::io::{Read, Write};

use crate::content::{ContentCodec, HEADER_LEN};
use crate::error::EncfsError;

/// Decrypting reader over a raw ciphertext stream.
pub struct EncfsReader<'v, R: Read> {
    codec: ContentCodec<'v>,
    inner: R,
    file_iv: u64,
    block_index: u64,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<'v, R: Read> EncfsReader<'v, R> {
    /// Open a reader; consumes and unmasks the header IV immediately.
    /// `external_iv` is the file's chained name IV when external IV
    /// chaining is enabled, 0 otherwise.
    pub fn new(codec: ContentCodec<'v>, mut inner: R, external_iv: u64) -> Result<Self, EncfsError> {
        let mut file_iv = 0u64;
        let mut done = false;
        if codec.layout().unique_iv {
            let mut header = [0u8; HEADER_LEN];
            let got = read_up_to(&mut inner, &mut header)?;
            if got == 0 {
                // Created but never written: no header, no content.
                done = true;
            } else if got == HEADER_LEN {
                file_iv = codec.unmask_header(&header, external_iv)?;
            } else {
                return Err(EncfsError::corrupt("file shorter than its header"));
            }
        }
        Ok(Self {
            codec,
            inner,
            file_iv,
            block_index: 0,
            buf: Vec::new(),
            pos: 0,
            done,
        })
    }

    fn fill(&mut self) -> std::io::Result<()> {
        let block_size = self.codec.layout().block_size;
        let mut stored = vec![0u8; block_size];
        let got = read_up_to(&mut self.inner, &mut stored)?;
        if got == 0 {
            self.done = true;
            return Ok(());
        }
        if got < block_size {
            // Short tail: nothing may follow it.
            self.done = true;
        }
        let data = self
            .codec
            .decode_block(self.block_index, self.file_iv, &stored[..got])
            .map_err(std::io::Error::from)?;
        self.block_index += 1;
        self.buf = data;
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for EncfsReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos == self.buf.len() {
            if self.done {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Encrypting writer over a raw ciphertext stream.
pub struct EncfsWriter<'v, W: Write> {
    codec: ContentCodec<'v>,
    inner: W,
    file_iv: u64,
    block_index: u64,
    buf: Vec<u8>,
    finished: bool,
}

impl<'v, W: Write> EncfsWriter<'v, W> {
    /// Open a writer; generates and emits the masked header IV immediately
    /// when the volume uses unique IVs.
    pub fn new(codec: ContentCodec<'v>, mut inner: W, external_iv: u64) -> Result<Self, EncfsError> {
        let mut file_iv = 0u64;
        if codec.layout().unique_iv {
            let (header, iv) = codec.make_header(external_iv);
            inner.write_all(&header)?;
            file_iv = iv;
        }
        Ok(Self {
            codec,
            inner,
            file_iv,
            block_index: 0,
            buf: Vec::new(),
            finished: false,
        })
    }

    /// Emit the pending tail block and flush the underlying stream. Must be
    /// called to complete the file; dropping the writer finishes it on a
    /// best-effort basis.
    pub fn finish(mut self) -> Result<(), EncfsError> {
        self.do_finish()
    }

    fn do_finish(&mut self) -> Result<(), EncfsError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.buf.is_empty() {
            let data = std::mem::take(&mut self.buf);
            let stored = self
                .codec
                .encode_block(self.block_index, self.file_iv, &data)?;
            self.inner.write_all(&stored)?;
            self.block_index += 1;
        }
        self.inner.flush()?;
        Ok(())
    }
}

impl<W: Write> Write for EncfsWriter<'_, W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.finished {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "write to a finished encrypted stream",
            ));
        }
        self.buf.extend_from_slice(data);
        let payload = self.codec.layout().payload();
        while self.buf.len() >= payload {
            let rest = self.buf.split_off(payload);
            let block = std::mem::replace(&mut self.buf, rest);
            let stored = self
                .codec
                .encode_block(self.block_index, self.file_iv, &block)
                .map_err(std::io::Error::from)?;
            self.inner.write_all(&stored)?;
            self.block_index += 1;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Buffered partial blocks can only be emitted by finish().
        self.inner.flush()
    }
}

impl<W: Write> Drop for EncfsWriter<'_, W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.do_finish() {
                log::warn!("encrypted stream dropped with unwritable tail: {}", err);
            }
        }
    }
}

/// Read until the buffer is full or the stream ends.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
