//! ALFA Media Vault - Media Cipher
//!
//! Streaming authenticated encryption of media payloads.
//!
//! ## Container
//!
//! ```text
//! [version: u8 = 1][stream nonce: 24 bytes]
//! repeated: [len: u32 BE][ciphertext || tag  (len bytes)]
//! [terminator: u32 BE = 0]
//! ```
//!
//! Blocks are sealed with XChaCha20-Poly1305 under the key's media subkey.
//! The block nonce is the stream nonce with the block counter XORed into its
//! last 8 bytes. The AAD is `version || counter (8 BE) || final flag`, so a
//! reordered, dropped or appended block fails authentication.

use std::io::ErrorKind;
use std::path::Path;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use zeroize::Zeroizing;

use super::aead::TAG_LEN;
use super::keys::{generate_xchacha_nonce, Key, XCHACHA_NONCE_LEN};
use crate::error::{VaultError, VaultResult};
use crate::secure_fs::PartialFile;

/// Current container format version
pub const CONTAINER_VERSION: u8 = 1;

/// File extension of encrypted originals
pub const CONTAINER_EXT: &str = "encamera";

/// Plaintext bytes per block
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Largest block a container may declare
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Version byte plus stream nonce
pub const HEADER_LEN: usize = 1 + XCHACHA_NONCE_LEN;

const LEN_PREFIX: usize = 4;

/// Container size for a plaintext of `plaintext_len` bytes
pub fn container_len(plaintext_len: u64, block_size: usize) -> u64 {
    let block_size = block_size as u64;
    let blocks = plaintext_len.div_ceil(block_size).max(1);
    HEADER_LEN as u64 + blocks * (LEN_PREFIX + TAG_LEN) as u64 + plaintext_len + LEN_PREFIX as u64
}

/// Per-stream block sealing state
struct BlockCipher {
    cipher: XChaCha20Poly1305,
    stream_nonce: [u8; XCHACHA_NONCE_LEN],
    counter: u64,
}

impl BlockCipher {
    fn new(key: &Key, stream_nonce: [u8; XCHACHA_NONCE_LEN]) -> VaultResult<Self> {
        let media_key = key.media_key()?;
        let cipher = XChaCha20Poly1305::new_from_slice(&*media_key)
            .map_err(|e| VaultError::CryptoError(e.to_string()))?;

        Ok(Self {
            cipher,
            stream_nonce,
            counter: 0,
        })
    }

    fn nonce(&self) -> [u8; XCHACHA_NONCE_LEN] {
        let mut nonce = self.stream_nonce;
        for (byte, c) in nonce[XCHACHA_NONCE_LEN - 8..]
            .iter_mut()
            .zip(self.counter.to_be_bytes())
        {
            *byte ^= c;
        }
        nonce
    }

    fn aad(&self, last: bool) -> [u8; 10] {
        let mut aad = [0u8; 10];
        aad[0] = CONTAINER_VERSION;
        aad[1..9].copy_from_slice(&self.counter.to_be_bytes());
        aad[9] = last as u8;
        aad
    }

    fn seal(&mut self, plaintext: &[u8], last: bool) -> VaultResult<Vec<u8>> {
        let nonce = self.nonce();
        let aad = self.aad(last);
        let sealed = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
            .map_err(|e| VaultError::CryptoError(e.to_string()))?;

        self.counter += 1;
        Ok(sealed)
    }

    fn try_open(&self, sealed: &[u8], last: bool) -> Option<Vec<u8>> {
        let nonce = self.nonce();
        let aad = self.aad(last);
        self.cipher
            .decrypt(XNonce::from_slice(&nonce), Payload { msg: sealed, aad: &aad })
            .ok()
    }

    fn open(&mut self, sealed: &[u8], last: bool) -> VaultResult<Zeroizing<Vec<u8>>> {
        if let Some(plaintext) = self.try_open(sealed, last) {
            self.counter += 1;
            return Ok(Zeroizing::new(plaintext));
        }

        // A block that authenticates as non-final followed by the terminator
        // means the tail of the container was cut off.
        if last && self.try_open(sealed, false).is_some() {
            return Err(VaultError::TruncatedInput);
        }

        Err(VaultError::AuthenticationFailure)
    }
}

fn check_block_len(len: usize) -> VaultResult<()> {
    if len < TAG_LEN || len > MAX_BLOCK_SIZE + TAG_LEN {
        return Err(VaultError::CryptoError(format!("malformed block length {}", len)));
    }
    Ok(())
}

fn parse_header(header: &[u8]) -> VaultResult<[u8; XCHACHA_NONCE_LEN]> {
    if header.len() < HEADER_LEN {
        return Err(VaultError::TruncatedInput);
    }
    if header[0] != CONTAINER_VERSION {
        return Err(VaultError::CryptoError(format!(
            "unsupported container version {}",
            header[0]
        )));
    }

    let mut nonce = [0u8; XCHACHA_NONCE_LEN];
    nonce.copy_from_slice(&header[1..HEADER_LEN]);
    Ok(nonce)
}

fn take_len(rest: &mut &[u8]) -> VaultResult<usize> {
    if rest.len() < LEN_PREFIX {
        return Err(VaultError::TruncatedInput);
    }
    let (prefix, tail) = rest.split_at(LEN_PREFIX);
    *rest = tail;
    let mut bytes = [0u8; LEN_PREFIX];
    bytes.copy_from_slice(prefix);
    Ok(u32::from_be_bytes(bytes) as usize)
}

async fn read_exact_or_truncated<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> VaultResult<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(VaultError::TruncatedInput),
        Err(e) => Err(e.into()),
    }
}

async fn read_len<R: AsyncRead + Unpin>(reader: &mut R) -> VaultResult<usize> {
    let mut bytes = [0u8; LEN_PREFIX];
    read_exact_or_truncated(reader, &mut bytes).await?;
    Ok(u32::from_be_bytes(bytes) as usize)
}

/// Read until `buf` is full or the reader is exhausted
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> VaultResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Streaming media cipher
#[derive(Debug, Clone)]
pub struct MediaCipher {
    block_size: usize,
}

impl Default for MediaCipher {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl MediaCipher {
    /// Create a cipher emitting blocks of `block_size` plaintext bytes
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(1, MAX_BLOCK_SIZE),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    // ═══════════════════════════════════════════════════════════════════════
    // IN-MEMORY
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt a payload held in memory
    pub fn encrypt_bytes(&self, key: &Key, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let stream_nonce = generate_xchacha_nonce();
        let mut blocks = BlockCipher::new(key, stream_nonce)?;

        let mut out = Vec::with_capacity(container_len(plaintext.len() as u64, self.block_size) as usize);
        out.push(CONTAINER_VERSION);
        out.extend_from_slice(&stream_nonce);

        let chunks: Vec<&[u8]> = if plaintext.is_empty() {
            vec![&plaintext[..0]]
        } else {
            plaintext.chunks(self.block_size).collect()
        };
        let last_index = chunks.len() - 1;

        for (i, chunk) in chunks.into_iter().enumerate() {
            let sealed = blocks.seal(chunk, i == last_index)?;
            out.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
            out.extend_from_slice(&sealed);
        }
        out.extend_from_slice(&0u32.to_be_bytes());

        debug!("Encrypted {} bytes into {} byte container", plaintext.len(), out.len());
        Ok(out)
    }

    /// Decrypt a container held in memory. Nothing is returned unless every
    /// block authenticates.
    pub fn decrypt_bytes(&self, key: &Key, container: &[u8]) -> VaultResult<Vec<u8>> {
        let stream_nonce = parse_header(container)?;
        let mut rest = &container[HEADER_LEN..];
        let mut blocks = BlockCipher::new(key, stream_nonce)?;
        let mut plaintext = Zeroizing::new(Vec::with_capacity(container.len()));

        let mut len = take_len(&mut rest)?;
        if len == 0 {
            return Err(VaultError::TruncatedInput);
        }

        loop {
            check_block_len(len)?;
            if rest.len() < len {
                return Err(VaultError::TruncatedInput);
            }
            let (sealed, tail) = rest.split_at(len);
            rest = tail;

            let next = take_len(&mut rest)?;
            let last = next == 0;
            plaintext.extend_from_slice(&blocks.open(sealed, last)?);
            if last {
                break;
            }
            len = next;
        }

        if !rest.is_empty() {
            return Err(VaultError::AuthenticationFailure);
        }

        Ok(std::mem::take(&mut *plaintext))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STREAMING
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt `src` into a container at `dst`. Returns the container size.
    pub async fn encrypt_file(&self, key: &Key, src: &Path, dst: &Path) -> VaultResult<u64> {
        let input = File::open(src).await?;
        self.encrypt_reader(key, input, dst).await
    }

    /// Encrypt everything `reader` yields into a container at `dst`.
    ///
    /// The container only appears at `dst` once complete.
    pub async fn encrypt_reader<R>(&self, key: &Key, reader: R, dst: &Path) -> VaultResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = PartialFile::new(dst);
        let mut writer = BufWriter::new(File::create(partial.path()).await?);
        let mut reader = BufReader::new(reader);

        let stream_nonce = generate_xchacha_nonce();
        let mut blocks = BlockCipher::new(key, stream_nonce)?;

        writer.write_all(&[CONTAINER_VERSION]).await?;
        writer.write_all(&stream_nonce).await?;
        let mut written = HEADER_LEN as u64;

        let mut current = Zeroizing::new(vec![0u8; self.block_size]);
        let mut next = Zeroizing::new(vec![0u8; self.block_size]);
        let mut current_len = fill(&mut reader, &mut current).await?;

        loop {
            let next_len = if current_len < self.block_size {
                0
            } else {
                fill(&mut reader, &mut next).await?
            };
            let last = next_len == 0;

            let sealed = blocks.seal(&current[..current_len], last)?;
            writer.write_all(&(sealed.len() as u32).to_be_bytes()).await?;
            writer.write_all(&sealed).await?;
            written += (LEN_PREFIX + sealed.len()) as u64;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
        }

        writer.write_all(&0u32.to_be_bytes()).await?;
        written += LEN_PREFIX as u64;
        writer.flush().await?;

        let file = writer.into_inner();
        file.sync_all().await?;
        drop(file);
        partial.commit().await?;

        debug!("Wrote {} byte container to {}", written, dst.display());
        Ok(written)
    }

    /// Decrypt the container at `src` into `dst`. Returns the plaintext size.
    ///
    /// `on_progress` receives the fraction of container bytes consumed. On
    /// failure or cancellation no file is left at `dst`.
    pub async fn decrypt_file<F>(&self, key: &Key, src: &Path, dst: &Path, on_progress: F) -> VaultResult<u64>
    where
        F: FnMut(f64),
    {
        let input = File::open(src).await?;
        let total = input.metadata().await?.len();
        self.decrypt_reader_to_file(key, input, total, dst, on_progress).await
    }

    /// Decrypt a container read from `reader` of `total` bytes into `dst`
    pub async fn decrypt_reader_to_file<R, F>(
        &self,
        key: &Key,
        reader: R,
        total: u64,
        dst: &Path,
        mut on_progress: F,
    ) -> VaultResult<u64>
    where
        R: AsyncRead + Unpin,
        F: FnMut(f64),
    {
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = PartialFile::new(dst);
        let mut writer = BufWriter::new(File::create(partial.path()).await?);
        let mut reader = BufReader::new(reader);

        let plaintext_len = decrypt_stream(key, &mut reader, &mut writer, total, &mut on_progress).await?;

        let file = writer.into_inner();
        file.sync_all().await?;
        drop(file);
        partial.commit().await?;

        debug!("Decrypted {} bytes to {}", plaintext_len, dst.display());
        Ok(plaintext_len)
    }

    /// Decrypt the container at `src` into memory
    pub async fn decrypt_file_to_bytes<F>(&self, key: &Key, src: &Path, mut on_progress: F) -> VaultResult<Vec<u8>>
    where
        F: FnMut(f64),
    {
        let input = File::open(src).await?;
        let total = input.metadata().await?.len();
        let mut reader = BufReader::new(input);

        let mut plaintext = Zeroizing::new(Vec::new());
        decrypt_stream(key, &mut reader, &mut *plaintext, total, &mut on_progress).await?;

        Ok(std::mem::take(&mut *plaintext))
    }
}

async fn decrypt_stream<R, W, F>(
    key: &Key,
    reader: &mut R,
    writer: &mut W,
    total: u64,
    on_progress: &mut F,
) -> VaultResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(f64),
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_or_truncated(reader, &mut header).await?;
    let mut blocks = BlockCipher::new(key, parse_header(&header)?)?;
    let mut consumed = HEADER_LEN as u64;

    let mut len = read_len(reader).await?;
    consumed += LEN_PREFIX as u64;
    if len == 0 {
        return Err(VaultError::TruncatedInput);
    }

    let mut sealed = Vec::new();
    let mut plaintext_len = 0u64;

    loop {
        check_block_len(len)?;
        sealed.resize(len, 0);
        read_exact_or_truncated(reader, &mut sealed).await?;
        let next = read_len(reader).await?;
        consumed += (len + LEN_PREFIX) as u64;

        let last = next == 0;
        let plaintext = blocks.open(&sealed, last)?;
        writer.write_all(&plaintext).await?;
        plaintext_len += plaintext.len() as u64;

        if total > 0 {
            on_progress((consumed as f64 / total as f64).min(1.0));
        }
        if last {
            break;
        }
        len = next;
    }

    let mut trailing = [0u8; 1];
    if reader.read(&mut trailing).await? != 0 {
        return Err(VaultError::AuthenticationFailure);
    }

    writer.flush().await?;
    on_progress(1.0);
    Ok(plaintext_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    const BLOCK: usize = 16;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Offsets of each `(len prefix, block)` pair in a container
    fn frames(container: &[u8]) -> Vec<(usize, usize)> {
        let mut frames = Vec::new();
        let mut pos = HEADER_LEN;
        loop {
            let len = u32::from_be_bytes(container[pos..pos + 4].try_into().unwrap()) as usize;
            if len == 0 {
                return frames;
            }
            frames.push((pos, len));
            pos += 4 + len;
        }
    }

    #[test]
    fn test_roundtrip_boundary_sizes() {
        let key = Key::generate("media");
        let cipher = MediaCipher::new(BLOCK);

        for len in [0, 1, BLOCK - 1, BLOCK, BLOCK + 1, 3 * BLOCK + 7] {
            let plaintext = payload(len);
            let container = cipher.encrypt_bytes(&key, &plaintext).unwrap();

            assert_eq!(container.len() as u64, container_len(len as u64, BLOCK), "len {}", len);
            assert_eq!(cipher.decrypt_bytes(&key, &container).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_empty_payload_is_single_final_block() {
        let key = Key::generate("empty");
        let container = MediaCipher::new(BLOCK).encrypt_bytes(&key, &[]).unwrap();

        assert_eq!(frames(&container), vec![(HEADER_LEN, TAG_LEN)]);
    }

    #[test]
    fn test_every_tampered_byte_is_rejected() {
        let key = Key::generate("tamper");
        let cipher = MediaCipher::new(BLOCK);
        let container = cipher.encrypt_bytes(&key, &payload(2 * BLOCK + 3)).unwrap();

        for (pos, len) in frames(&container) {
            for i in pos + 4..pos + 4 + len {
                let mut tampered = container.clone();
                tampered[i] ^= 0x80;
                assert!(
                    matches!(cipher.decrypt_bytes(&key, &tampered), Err(VaultError::AuthenticationFailure)),
                    "byte {} accepted",
                    i
                );
            }
        }

        let mut nonce_flip = container.clone();
        nonce_flip[5] ^= 0x01;
        assert!(matches!(
            cipher.decrypt_bytes(&key, &nonce_flip),
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let cipher = MediaCipher::new(BLOCK);
        let container = cipher.encrypt_bytes(&Key::generate("a"), b"vacation.jpg").unwrap();

        let err = cipher.decrypt_bytes(&Key::generate("b"), &container).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_truncation_and_reordering() {
        let key = Key::generate("structure");
        let cipher = MediaCipher::new(BLOCK);
        let container = cipher.encrypt_bytes(&key, &payload(3 * BLOCK)).unwrap();
        let f = frames(&container);

        // terminator missing
        let cut = &container[..container.len() - 4];
        assert!(matches!(cipher.decrypt_bytes(&key, cut), Err(VaultError::TruncatedInput)));

        // mid-block
        let cut = &container[..f[1].0 + 10];
        assert!(matches!(cipher.decrypt_bytes(&key, cut), Err(VaultError::TruncatedInput)));

        // whole last block dropped, terminator kept
        let mut dropped = container[..f[2].0].to_vec();
        dropped.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(cipher.decrypt_bytes(&key, &dropped), Err(VaultError::TruncatedInput)));

        // trailing data after the final block
        let mut extended = container.clone();
        extended.extend_from_slice(b"junk");
        assert!(matches!(
            cipher.decrypt_bytes(&key, &extended),
            Err(VaultError::AuthenticationFailure)
        ));

        // swap first two blocks (same length)
        let (a, b) = (f[0], f[1]);
        let mut swapped = container[..HEADER_LEN].to_vec();
        swapped.extend_from_slice(&container[b.0..b.0 + 4 + b.1]);
        swapped.extend_from_slice(&container[a.0..a.0 + 4 + a.1]);
        swapped.extend_from_slice(&container[f[2].0..]);
        assert!(matches!(
            cipher.decrypt_bytes(&key, &swapped),
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_bad_header() {
        let key = Key::generate("header");
        let cipher = MediaCipher::new(BLOCK);
        let mut container = cipher.encrypt_bytes(&key, b"x").unwrap();

        assert!(matches!(cipher.decrypt_bytes(&key, &container[..7]), Err(VaultError::TruncatedInput)));

        container[0] = 9;
        assert!(matches!(cipher.decrypt_bytes(&key, &container), Err(VaultError::CryptoError(_))));
    }

    #[tokio::test]
    async fn test_file_roundtrip_with_progress() {
        let dir = tempdir().unwrap();
        let key = Key::generate("files");
        let cipher = MediaCipher::new(1024);

        let plain = dir.path().join("clip.mov");
        let sealed = dir.path().join("clip.mov.encamera");
        let restored = dir.path().join("restored.mov");
        let data = payload(10 * 1024 + 5);
        std::fs::write(&plain, &data).unwrap();

        let written = cipher.encrypt_file(&key, &plain, &sealed).await.unwrap();
        assert_eq!(written, std::fs::metadata(&sealed).unwrap().len());
        assert_eq!(written, container_len(data.len() as u64, 1024));

        let mut seen = Vec::new();
        let n = cipher
            .decrypt_file(&key, &sealed, &restored, |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(n, data.len() as u64);
        assert_eq!(std::fs::read(&restored).unwrap(), data);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));

        let in_memory = cipher.decrypt_file_to_bytes(&key, &sealed, |_| {}).await.unwrap();
        assert_eq!(in_memory, data);
    }

    #[tokio::test]
    async fn test_failed_file_decrypt_leaves_nothing() {
        let dir = tempdir().unwrap();
        let cipher = MediaCipher::new(BLOCK);
        let sealed = dir.path().join("x.encamera");
        let out = dir.path().join("out.jpg");

        let container = cipher.encrypt_bytes(&Key::generate("right"), &payload(100)).unwrap();
        std::fs::write(&sealed, &container).unwrap();

        let err = cipher
            .decrypt_file(&Key::generate("wrong"), &sealed, &out, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_authentication_failure());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_decrypt_removes_partial_output() {
        let dir = tempdir().unwrap();
        let key = Key::generate("cancel");
        let cipher = MediaCipher::new(BLOCK);
        let container = cipher.encrypt_bytes(&key, &payload(8 * BLOCK)).unwrap();
        let out = dir.path().join("out.bin");

        // Only half of the container ever arrives
        let (mut tx, rx) = tokio::io::duplex(container.len());
        tx.write_all(&container[..container.len() / 2]).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            cipher.decrypt_reader_to_file(&key, rx, container.len() as u64, &out, |_| {}),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        drop(tx);
    }
}
