//! Encrypted container codec
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256, 65 536 iterations, 256-bit key
//! - **Encryption**: AES-256-GCM, random 96-bit IV, 128-bit tag
//! - **Container**: `"CAEF"` ‖ salt_len (1 byte) ‖ salt ‖ iv_len (1 byte) ‖ iv ‖ ciphertext ‖ tag
//!
//! Payloads are processed in fixed-size chunks so memory use does not grow
//! with the file. GCM is assembled from its parts (AES-CTR keystream plus a
//! GHASH accumulator) because a one-shot AEAD would need the whole file in
//! memory; the output is byte-identical to any standard AES-256-GCM
//! implementation with no associated data.
//!
//! Decryption writes plaintext before the tag has been checked. The file
//! level helpers delete the destination when verification fails, so callers
//! never see unauthenticated output on disk.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use syncro_core::domain::SyncError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Format marker at the start of every container.
pub const MAGIC: &[u8; 4] = b"CAEF";
/// Salt length written by [`encrypt_to`].
pub const SALT_LEN: usize = 16;
/// IV length written by [`encrypt_to`].
pub const IV_LEN: usize = 12;
/// Authentication tag length.
pub const TAG_LEN: usize = 16;
/// PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 65_536;
/// Derived key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// Plaintext/ciphertext processing granularity.
pub const CHUNK_SIZE: usize = 8192;

type Aes256Ctr = ctr::Ctr32BE<Aes256>;
type Block = GenericArray<u8, aes::cipher::consts::U16>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors produced by the container codec
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input does not start with the container magic
    #[error("Unrecognized file format")]
    UnrecognizedFormat,

    /// The header or the tag is cut short
    #[error("Encrypted container is truncated")]
    Truncated,

    /// Wrong password, tampered data or an unusable header
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnrecognizedFormat => SyncError::Format(err.to_string()),
            CodecError::Io(e) => SyncError::Io(e),
            other => SyncError::Crypto(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Key derivation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derive an AES-256 key from a password using PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CodecError> {
    if password.is_empty() {
        return Err(CodecError::KeyDerivation("password must not be empty".into()));
    }
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    Ok(key)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Header
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Salt and IV carried in front of the ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
}

impl ContainerHeader {
    /// Fresh random salt and IV
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut salt = vec![0u8; SALT_LEN];
        let mut iv = vec![0u8; IV_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);
        Self { salt, iv }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        let too_long = |what: &str| {
            CodecError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{what} longer than 255 bytes"),
            ))
        };
        let salt_len = u8::try_from(self.salt.len()).map_err(|_| too_long("salt"))?;
        let iv_len = u8::try_from(self.iv.len()).map_err(|_| too_long("IV"))?;
        writer.write_all(MAGIC)?;
        writer.write_all(&[salt_len])?;
        writer.write_all(&self.salt)?;
        writer.write_all(&[iv_len])?;
        writer.write_all(&self.iv)?;
        Ok(())
    }

    /// Reads and validates the header
    ///
    /// Input shorter than the magic, or with a different magic, is
    /// [`CodecError::UnrecognizedFormat`]; a header cut short after the magic
    /// is [`CodecError::Truncated`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        let mut magic = [0u8; 4];
        match reader.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(CodecError::UnrecognizedFormat)
            }
            Err(e) => return Err(e.into()),
        }
        if &magic != MAGIC {
            return Err(CodecError::UnrecognizedFormat);
        }

        let salt = read_prefixed(reader)?;
        let iv = read_prefixed(reader)?;
        if iv.is_empty() {
            return Err(CodecError::Decryption("empty IV".into()));
        }
        Ok(Self { salt, iv })
    }
}

fn read_prefixed<R: Read>(reader: &mut R) -> Result<Vec<u8>, CodecError> {
    let mut len = [0u8; 1];
    read_exact_or_truncated(reader, &mut len)?;
    let mut bytes = vec![0u8; usize::from(len[0])];
    read_exact_or_truncated(reader, &mut bytes)?;
    Ok(bytes)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), CodecError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CodecError::Truncated,
        _ => CodecError::Io(e),
    })
}

/// Reads up to `buf.len()` bytes, retrying on interruption
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Streaming GCM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental AES-256-GCM without associated data
struct GcmStream {
    keystream: Aes256Ctr,
    ghash: GHash,
    partial: [u8; 16],
    partial_len: usize,
    ciphertext_len: u64,
    tag_mask: Block,
}

impl GcmStream {
    fn new(key: &[u8; KEY_LEN], iv: &[u8]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key));

        let mut hash_key = Block::default();
        cipher.encrypt_block(&mut hash_key);

        let j0 = if iv.len() == IV_LEN {
            let mut block = Block::default();
            block[..IV_LEN].copy_from_slice(iv);
            block[15] = 1;
            block
        } else {
            let mut ghash = GHash::new(&hash_key);
            ghash.update_padded(iv);
            ghash.update(&[length_block(0, iv.len() as u64)]);
            ghash.finalize()
        };

        let mut tag_mask = j0;
        cipher.encrypt_block(&mut tag_mask);

        let mut counter = j0;
        increment_counter(&mut counter);

        Self {
            keystream: Aes256Ctr::new(GenericArray::from_slice(key), &counter),
            ghash: GHash::new(&hash_key),
            partial: [0u8; 16],
            partial_len: 0,
            ciphertext_len: 0,
            tag_mask,
        }
    }

    fn encrypt(&mut self, chunk: &mut [u8]) {
        self.keystream.apply_keystream(chunk);
        self.absorb(chunk);
    }

    fn decrypt(&mut self, chunk: &mut [u8]) {
        self.absorb(chunk);
        self.keystream.apply_keystream(chunk);
    }

    /// Feeds ciphertext into GHASH in whole blocks, carrying the remainder
    fn absorb(&mut self, mut data: &[u8]) {
        self.ciphertext_len += data.len() as u64;

        if self.partial_len > 0 {
            let take = (16 - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + take].copy_from_slice(&data[..take]);
            self.partial_len += take;
            data = &data[take..];
            if self.partial_len < 16 {
                return;
            }
            self.ghash.update(&[Block::clone_from_slice(&self.partial)]);
            self.partial_len = 0;
        }

        let mut blocks = data.chunks_exact(16);
        for block in &mut blocks {
            self.ghash.update(&[Block::clone_from_slice(block)]);
        }
        let rest = blocks.remainder();
        self.partial[..rest.len()].copy_from_slice(rest);
        self.partial_len = rest.len();
    }

    fn finish(mut self) -> [u8; TAG_LEN] {
        if self.partial_len > 0 {
            self.ghash.update_padded(&self.partial[..self.partial_len]);
        }
        self.ghash.update(&[length_block(0, self.ciphertext_len)]);
        let digest = self.ghash.finalize();

        let mut tag = [0u8; TAG_LEN];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = digest[i] ^ self.tag_mask[i];
        }
        tag
    }
}

/// `[len(A)]64 ‖ [len(C)]64` in bits
fn length_block(aad_bytes: u64, text_bytes: u64) -> Block {
    let mut block = Block::default();
    block[..8].copy_from_slice(&(aad_bytes * 8).to_be_bytes());
    block[8..].copy_from_slice(&(text_bytes * 8).to_be_bytes());
    block
}

/// inc32: increments the low 32 bits of the counter block
fn increment_counter(block: &mut Block) {
    let mut low = [0u8; 4];
    low.copy_from_slice(&block[12..]);
    let next = u32::from_be_bytes(low).wrapping_add(1);
    block[12..].copy_from_slice(&next.to_be_bytes());
}

fn tags_match(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Stream-level encrypt / decrypt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Encrypts everything `reader` yields into a container written to `writer`
///
/// Returns the number of plaintext bytes consumed.
pub fn encrypt_to<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    password: &str,
) -> Result<u64, CodecError> {
    let header = ContainerHeader::generate();
    let key = derive_key(password, &header.salt)?;
    header.write_to(writer)?;

    let mut gcm = GcmStream::new(&key, &header.iv);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = read_chunk(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        gcm.encrypt(&mut buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }

    writer.write_all(&gcm.finish())?;
    writer.flush()?;
    Ok(total)
}

/// Decrypts the body following an already-read `header`
///
/// The last [`TAG_LEN`] bytes of the stream are held back as the tag.
pub fn decrypt_body<R: Read, W: Write>(
    header: &ContainerHeader,
    reader: &mut R,
    writer: &mut W,
    password: &str,
) -> Result<u64, CodecError> {
    let key = derive_key(password, &header.salt)?;
    let mut gcm = GcmStream::new(&key, &header.iv);

    let mut held: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + TAG_LEN);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = read_chunk(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        held.extend_from_slice(&buf[..n]);
        if held.len() > TAG_LEN {
            let ready = held.len() - TAG_LEN;
            let mut chunk: Vec<u8> = held.drain(..ready).collect();
            gcm.decrypt(&mut chunk);
            writer.write_all(&chunk)?;
            total += ready as u64;
        }
    }

    if held.len() < TAG_LEN {
        return Err(CodecError::Truncated);
    }
    if !tags_match(&gcm.finish(), &held) {
        return Err(CodecError::Decryption(
            "authentication failed: wrong password or corrupted data".into(),
        ));
    }
    writer.flush()?;
    Ok(total)
}

/// Reads the header from `reader`, then decrypts the rest into `writer`
pub fn decrypt_to<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    password: &str,
) -> Result<u64, CodecError> {
    let header = ContainerHeader::read_from(reader)?;
    decrypt_body(&header, reader, writer, password)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  File-level encrypt / decrypt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Encrypts `source` into a new container at `dest`
///
/// `dest` is removed again if encryption fails part-way.
pub fn encrypt_file(source: &Path, dest: &Path, password: &str) -> Result<u64, CodecError> {
    let mut input = BufReader::new(File::open(source)?);
    let mut output = BufWriter::new(File::create(dest)?);
    let result = encrypt_to(&mut input, &mut output, password);
    drop(output);
    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

/// Decrypts the container at `source` into `dest`
///
/// The magic is checked before `dest` is created, so an
/// [`CodecError::UnrecognizedFormat`] leaves the filesystem untouched.
/// Any later failure removes the partially written `dest`.
pub fn decrypt_file(source: &Path, dest: &Path, password: &str) -> Result<u64, CodecError> {
    let mut input = BufReader::new(File::open(source)?);
    let header = ContainerHeader::read_from(&mut input)?;

    let mut output = BufWriter::new(File::create(dest)?);
    let result = decrypt_body(&header, &mut input, &mut output, password);
    drop(output);
    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

/// [`encrypt_file`] on the blocking thread pool
pub async fn encrypt_file_async(
    source: PathBuf,
    dest: PathBuf,
    password: String,
) -> Result<u64, CodecError> {
    tokio::task::spawn_blocking(move || encrypt_file(&source, &dest, &password))
        .await
        .map_err(|e| CodecError::Io(io::Error::other(e)))?
}

/// [`decrypt_file`] on the blocking thread pool
pub async fn decrypt_file_async(
    source: PathBuf,
    dest: PathBuf,
    password: String,
) -> Result<u64, CodecError> {
    tokio::task::spawn_blocking(move || decrypt_file(&source, &dest, &password))
        .await
        .map_err(|e| CodecError::Io(io::Error::other(e)))?
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use aes_gcm::aead::{Aead, KeyInit as _};
    use aes_gcm::{Aes256Gcm, Nonce};

    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn encrypt_with_stream(key: &[u8; KEY_LEN], iv: &[u8], plain: &[u8], piece: usize) -> Vec<u8> {
        let mut gcm = GcmStream::new(key, iv);
        let mut out = plain.to_vec();
        for chunk in out.chunks_mut(piece) {
            gcm.encrypt(chunk);
        }
        out.extend_from_slice(&gcm.finish());
        out
    }

    #[test]
    fn test_stream_matches_one_shot_gcm() {
        let key = [7u8; KEY_LEN];
        let iv = [9u8; IV_LEN];
        let reference = Aes256Gcm::new_from_slice(&key).unwrap();

        for len in [0usize, 1, 15, 16, 17, 100, CHUNK_SIZE + 3] {
            let plain = payload(len);
            let expected = reference.encrypt(Nonce::from_slice(&iv), plain.as_slice()).unwrap();
            // odd piece sizes exercise the partial-block carry
            for piece in [1usize, 5, 16, 4096] {
                assert_eq!(
                    encrypt_with_stream(&key, &iv, &plain, piece),
                    expected,
                    "len {len}, piece {piece}"
                );
            }
        }
    }

    #[test]
    fn test_container_layout_and_interop() {
        let plain = payload(20_000);
        let mut container = Vec::new();
        encrypt_to(&mut plain.as_slice(), &mut container, "hunter2").unwrap();

        assert_eq!(&container[..4], MAGIC);
        assert_eq!(container[4] as usize, SALT_LEN);
        assert_eq!(container[5 + SALT_LEN] as usize, IV_LEN);
        let body_start = 6 + SALT_LEN + IV_LEN;
        assert_eq!(container.len(), body_start + plain.len() + TAG_LEN);

        let salt = &container[5..5 + SALT_LEN];
        let iv = &container[6 + SALT_LEN..body_start];
        let key = derive_key("hunter2", salt).unwrap();
        let reference = Aes256Gcm::new_from_slice(&key).unwrap();
        let decrypted = reference
            .decrypt(Nonce::from_slice(iv), &container[body_start..])
            .unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn test_round_trip_and_wrong_password() {
        let plain = payload(CHUNK_SIZE * 2 + 11);
        let mut container = Vec::new();
        encrypt_to(&mut plain.as_slice(), &mut container, "correct horse").unwrap();

        let mut out = Vec::new();
        decrypt_to(&mut container.as_slice(), &mut out, "correct horse").unwrap();
        assert_eq!(out, plain);

        let mut out = Vec::new();
        let err = decrypt_to(&mut container.as_slice(), &mut out, "battery staple").unwrap_err();
        assert!(matches!(err, CodecError::Decryption(_)));
        assert!(matches!(SyncError::from(err), SyncError::Crypto(_)));
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let key = [3u8; KEY_LEN];
        let iv = [4u8; IV_LEN];
        let mut sealed = encrypt_with_stream(&key, &iv, b"attack at dawn", 16);
        sealed[2] ^= 0x01;

        let mut gcm = GcmStream::new(&key, &iv);
        let split = sealed.len() - TAG_LEN;
        let (body, tag) = sealed.split_at_mut(split);
        gcm.decrypt(body);
        assert!(!tags_match(&gcm.finish(), tag));
    }

    #[test]
    fn test_unrecognized_format() {
        let err = decrypt_to(&mut &b"plain text file"[..], &mut Vec::new(), "pw").unwrap_err();
        assert!(matches!(err, CodecError::UnrecognizedFormat));
        assert!(SyncError::from(err).is_format_error());

        let err = decrypt_to(&mut &b"CA"[..], &mut Vec::new(), "pw").unwrap_err();
        assert!(matches!(err, CodecError::UnrecognizedFormat));
    }

    #[test]
    fn test_truncated_container() {
        let mut header = Vec::new();
        header.extend_from_slice(MAGIC);
        header.push(16);
        header.extend_from_slice(&[0u8; 8]);
        let err = ContainerHeader::read_from(&mut header.as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::Truncated));
    }

    #[test]
    fn test_empty_password_is_rejected() {
        let err = derive_key("", &[0u8; SALT_LEN]).unwrap_err();
        assert!(matches!(err, CodecError::KeyDerivation(_)));
    }

    #[test]
    fn test_increment_counter_wraps() {
        let mut block = Block::default();
        block[12..].copy_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        block[11] = 0xaa;
        increment_counter(&mut block);
        assert_eq!(&block[11..], &[0xaa, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decrypt_file_leaves_no_output_for_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        let dest = dir.path().join("notes.out");
        std::fs::write(&source, b"never encrypted").unwrap();

        let err = decrypt_file(&source, &dest, "pw").unwrap_err();
        assert!(matches!(err, CodecError::UnrecognizedFormat));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_file_round_trip_async() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.txt");
        let sealed = dir.path().join("report.txt.enc");
        let opened = dir.path().join("report.out");
        std::fs::write(&source, payload(50_000)).unwrap();

        let written = encrypt_file_async(source.clone(), sealed.clone(), "pw".into())
            .await
            .unwrap();
        assert_eq!(written, 50_000);
        assert_eq!(
            std::fs::metadata(&sealed).unwrap().len(),
            (6 + SALT_LEN + IV_LEN + 50_000 + TAG_LEN) as u64
        );

        decrypt_file_async(sealed.clone(), opened.clone(), "pw".into())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&opened).unwrap(), payload(50_000));

        let err = decrypt_file_async(sealed, opened.clone(), "wrong".into())
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Decryption(_)));
        assert!(!opened.exists());
    }
}
