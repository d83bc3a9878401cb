//! Chunked AES-256-GCM stream writer and reader.

use std::io::{self, Read, Write};

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{SealError, SealResult};
use crate::key::{Key, KEY_ID_SIZE};

/// Magic bytes opening every sealed stream.
const STREAM_MAGIC: [u8; 8] = *b"CHRSEAL1";

/// Length of the random per-stream nonce prefix.
const NONCE_PREFIX_SIZE: usize = 8;

/// Full GCM nonce length: prefix plus a 4-byte chunk counter.
const NONCE_SIZE: usize = 12;

/// GCM authentication tag length.
const TAG_SIZE: usize = 16;

/// Chunk flag values.
const FLAG_MORE: u8 = 0;
const FLAG_FINAL: u8 = 1;

/// Options controlling how a stream is sealed.
#[derive(Debug, Clone)]
pub struct SealOptions {
    /// Plaintext bytes gathered into one chunk before encryption.
    pub chunk_size: usize,
}

impl Default for SealOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

/// Builds the per-chunk associated data: caller AAD plus the chunk flag.
///
/// The flag must be authenticated, otherwise an attacker could strip the
/// final marker and truncate the stream undetected.
fn chunk_aad(associated_data: &[u8], flag: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(associated_data.len() + 1);
    aad.extend_from_slice(associated_data);
    aad.push(flag);
    aad
}

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Starts sealing a stream into `out`.
///
/// Writes the preamble immediately. Plaintext handed to the returned writer
/// is buffered into chunks; call [`SealWriter::finish`] to emit the final
/// chunk, without it the stream is considered truncated by readers.
pub fn seal<W: Write>(
    mut out: W,
    key: &Key,
    associated_data: &[u8],
    options: &SealOptions,
) -> SealResult<SealWriter<W>> {
    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_prefix);

    out.write_all(&STREAM_MAGIC)?;
    out.write_all(key.id())?;
    out.write_all(&nonce_prefix)?;

    Ok(SealWriter {
        out: Some(out),
        cipher: Aes256Gcm::new(GenericArray::from_slice(key.material())),
        aad: associated_data.to_vec(),
        nonce_prefix,
        counter: 0,
        chunk_size: options.chunk_size.max(1),
        buffer: Vec::with_capacity(options.chunk_size.max(1)),
    })
}

/// Streaming sealing writer returned by [`seal`].
pub struct SealWriter<W: Write> {
    out: Option<W>,
    cipher: Aes256Gcm,
    aad: Vec<u8>,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u32,
    chunk_size: usize,
    buffer: Vec<u8>,
}

impl<W: Write> SealWriter<W> {
    /// Appends plaintext to the stream.
    pub fn write_plaintext(&mut self, mut data: &[u8]) -> SealResult<()> {
        while !data.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.chunk_size {
                self.emit_chunk(FLAG_MORE)?;
            }
        }
        Ok(())
    }

    /// Emits the final chunk and returns the underlying writer.
    ///
    /// Dropping the writer without calling this produces a stream that
    /// readers reject as truncated.
    pub fn finish(mut self) -> SealResult<W> {
        self.emit_chunk(FLAG_FINAL)?;
        let Some(out) = self.out.take() else {
            return Err(SealError::Truncated);
        };
        Ok(out)
    }

    fn emit_chunk(&mut self, flag: u8) -> SealResult<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(SealError::Truncated);
        };
        let nonce = chunk_nonce(&self.nonce_prefix, self.counter);
        let aad = chunk_aad(&self.aad, flag);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &self.buffer,
                    aad: &aad,
                },
            )
            .map_err(|_| SealError::EncryptionFailed)?;

        let len = u32::try_from(ciphertext.len()).map_err(|_| SealError::EncryptionFailed)?;
        out.write_all(&[flag])?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&ciphertext)?;

        self.counter = self.counter.wrapping_add(1);
        self.buffer.clear();
        Ok(())
    }
}

impl<W: Write> Write for SealWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_plaintext(buf).map_err(SealError::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Chunks are emitted when full or on finish; nothing to flush early.
        match self.out.as_mut() {
            Some(out) => out.flush(),
            None => Ok(()),
        }
    }
}

/// Reads a sealed stream preamble without decrypting anything.
///
/// The returned opener exposes the key id so the caller can look up the
/// matching key, then [`SealOpener::open`] yields a plaintext reader.
pub fn prepare<R: Read>(mut input: R, associated_data: &[u8]) -> SealResult<SealOpener<R>> {
    let mut magic = [0u8; 8];
    read_exact_or(&mut input, &mut magic, SealError::UnsupportedFormat)?;
    if magic != STREAM_MAGIC {
        return Err(SealError::UnsupportedFormat);
    }

    let mut key_id = [0u8; KEY_ID_SIZE];
    read_exact_or(&mut input, &mut key_id, SealError::Truncated)?;

    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    read_exact_or(&mut input, &mut nonce_prefix, SealError::Truncated)?;

    Ok(SealOpener {
        input,
        key_id,
        nonce_prefix,
        aad: associated_data.to_vec(),
    })
}

fn read_exact_or<R: Read>(input: &mut R, buf: &mut [u8], on_eof: SealError) -> SealResult<()> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(on_eof),
        Err(err) => Err(err.into()),
    }
}

/// A parsed sealed stream preamble, waiting for its key.
pub struct SealOpener<R: Read> {
    input: R,
    key_id: [u8; KEY_ID_SIZE],
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    aad: Vec<u8>,
}

impl<R: Read> SealOpener<R> {
    /// The key id recorded in the stream preamble.
    #[must_use]
    pub fn key_id(&self) -> &[u8; KEY_ID_SIZE] {
        &self.key_id
    }

    /// Opens the stream with the given key, producing a plaintext reader.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::WrongKey`] if the key id does not match the
    /// preamble.
    pub fn open(self, key: &Key) -> SealResult<SealReader<R>> {
        if key.id() != &self.key_id {
            return Err(SealError::WrongKey);
        }
        Ok(SealReader {
            input: self.input,
            cipher: Aes256Gcm::new(GenericArray::from_slice(key.material())),
            aad: self.aad,
            nonce_prefix: self.nonce_prefix,
            counter: 0,
            plaintext: Vec::new(),
            pos: 0,
            finished: false,
            max_chunk: 16 * 1024 * 1024,
        })
    }
}

/// Decrypting reader over a sealed stream.
///
/// Yields plaintext until the authenticated final chunk; a stream that ends
/// without one produces [`SealError::Truncated`] (as an `InvalidData` I/O
/// error).
pub struct SealReader<R: Read> {
    input: R,
    cipher: Aes256Gcm,
    aad: Vec<u8>,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u32,
    plaintext: Vec<u8>,
    pos: usize,
    finished: bool,
    max_chunk: usize,
}

impl<R: Read> SealReader<R> {
    fn fill_chunk(&mut self) -> SealResult<()> {
        let mut head = [0u8; 5];
        match self.input.read_exact(&mut head) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(SealError::Truncated);
            }
            Err(err) => return Err(err.into()),
        }

        let flag = head[0];
        if flag != FLAG_MORE && flag != FLAG_FINAL {
            return Err(SealError::Authentication);
        }
        let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
        if len < TAG_SIZE {
            return Err(SealError::Authentication);
        }
        if len > self.max_chunk + TAG_SIZE {
            return Err(SealError::ChunkTooLarge {
                length: len,
                max: self.max_chunk + TAG_SIZE,
            });
        }

        let mut ciphertext = vec![0u8; len];
        read_exact_or(&mut self.input, &mut ciphertext, SealError::Truncated)?;

        let nonce = chunk_nonce(&self.nonce_prefix, self.counter);
        let aad = chunk_aad(&self.aad, flag);
        self.plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| SealError::Authentication)?;
        self.pos = 0;
        self.counter = self.counter.wrapping_add(1);
        if flag == FLAG_FINAL {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for SealReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.plaintext.len() {
                let take = buf.len().min(self.plaintext.len() - self.pos);
                buf[..take].copy_from_slice(&self.plaintext[self.pos..self.pos + take]);
                self.pos += take;
                return Ok(take);
            }
            if self.finished {
                return Ok(0);
            }
            self.fill_chunk().map_err(SealError::into_io)?;
        }
    }
}
