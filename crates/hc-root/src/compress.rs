//! ROOT-style compression blocks (ZL = zlib, XZ = LZMA, L4 = LZ4, ZS = ZSTD).
//!
//! Compressed payloads are written as one or more 9-byte-header blocks:
//! ```text
//! bytes 0-1:  algorithm tag ("ZL", "XZ", "L4", "ZS")
//! byte  2:    method
//! bytes 3-5:  compressed size   (3-byte little-endian)
//! bytes 6-8:  uncompressed size (3-byte little-endian)
//! ```
//! LZ4 payloads start with the big-endian xxhash64 of the compressed bytes.
//! A buffer that does not shrink is stored raw; readers recognise it by
//! equal compressed and uncompressed lengths.

use std::hash::Hasher;
use std::io::{Read, Write};

use hc_core::{Compression, CompressionAlgorithm, Error, Result};
use twox_hash::XxHash64;

/// Largest uncompressed (and compressed) size of one block.
pub const MAX_BLOCK: usize = 0xFF_FFFF;

const HEADER_LEN: usize = 9;
const LZ4_CHECKSUM_LEN: usize = 8;

type Encoder = fn(&[u8], u32) -> Result<Vec<u8>>;

/// Compress `src` into ROOT-style blocks, or return it raw if that is smaller.
pub fn compress(src: &[u8], compression: Compression) -> Result<Vec<u8>> {
    if compression.is_none() || src.is_empty() {
        return Ok(src.to_vec());
    }
    let (tag, method, encode): (&[u8; 2], u8, Encoder) = match compression.algorithm {
        CompressionAlgorithm::Zlib => (b"ZL", 8, compress_zlib),
        CompressionAlgorithm::Lzma => (b"XZ", 0, compress_xz),
        CompressionAlgorithm::Lz4 => (b"L4", 1, compress_lz4),
        CompressionAlgorithm::Zstd => (b"ZS", 1, compress_zstd),
        CompressionAlgorithm::None => return Ok(src.to_vec()),
    };

    let mut out = Vec::with_capacity(src.len() / 2 + HEADER_LEN);
    for block in src.chunks(MAX_BLOCK) {
        let payload = encode(block, compression.level)?;
        if payload.len() > MAX_BLOCK {
            return Ok(src.to_vec());
        }
        out.extend_from_slice(tag);
        out.push(method);
        write_le24(&mut out, payload.len());
        write_le24(&mut out, block.len());
        out.extend_from_slice(&payload);
    }

    if out.len() >= src.len() {
        return Ok(src.to_vec());
    }
    Ok(out)
}

/// Decompress ROOT-style blocks into `expected_len` bytes.
pub fn decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    if src.len() == expected_len {
        return Ok(src.to_vec());
    }
    let mut out = Vec::with_capacity(expected_len);
    let mut offset = 0;

    while out.len() < expected_len && offset + HEADER_LEN <= src.len() {
        let tag = &src[offset..offset + 2];
        let c_size = read_le24(&src[offset + 3..offset + 6]);
        let u_size = read_le24(&src[offset + 6..offset + 9]);
        offset += HEADER_LEN;

        let end = offset + c_size;
        if end > src.len() {
            return Err(Error::Codec(format!(
                "compressed block claims {} bytes but only {} remain",
                c_size,
                src.len() - offset
            )));
        }
        let compressed = &src[offset..end];

        let decompressed = match tag {
            b"ZL" => decompress_zlib(compressed, u_size)?,
            b"L4" => decompress_lz4(compressed, u_size)?,
            b"ZS" => decompress_zstd(compressed, u_size)?,
            b"XZ" => decompress_xz(compressed, u_size)?,
            _ => {
                return Err(Error::Codec(format!(
                    "unsupported compression algorithm: {:?}",
                    String::from_utf8_lossy(tag)
                )));
            }
        };
        if decompressed.len() != u_size {
            return Err(Error::Codec(format!(
                "expected {} uncompressed bytes, got {}",
                u_size,
                decompressed.len()
            )));
        }
        out.extend_from_slice(&decompressed);
        offset = end;
    }

    if out.len() != expected_len {
        return Err(Error::Codec(format!(
            "total decompressed length {} != expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}

// ── Encoders ────────────────────────────────────────────────────

fn compress_zlib(data: &[u8], level: u32) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;

    let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

fn compress_xz(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut enc = xz2::write::XzEncoder::new(Vec::new(), level.min(9));
    enc.write_all(data).map_err(|e| Error::Codec(format!("xz: {e}")))?;
    enc.finish().map_err(|e| Error::Codec(format!("xz: {e}")))
}

fn compress_lz4(data: &[u8], _level: u32) -> Result<Vec<u8>> {
    let body = lz4_flex::compress(data);
    let mut out = Vec::with_capacity(LZ4_CHECKSUM_LEN + body.len());
    out.extend_from_slice(&checksum(&body).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

// ruzstd only implements its fastest level; the requested level is not honoured.
fn compress_zstd(data: &[u8], _level: u32) -> Result<Vec<u8>> {
    Ok(ruzstd::encoding::compress_to_vec(data, ruzstd::encoding::CompressionLevel::Fastest))
}

// ── Decoders ────────────────────────────────────────────────────

fn decompress_zlib(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected);
    decoder.read_to_end(&mut out).map_err(|e| Error::Codec(format!("zlib: {e}")))?;
    Ok(out)
}

fn decompress_lz4(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    if data.len() < LZ4_CHECKSUM_LEN {
        return Err(Error::Codec("LZ4 block too small for checksum header".into()));
    }
    let (sum, body) = data.split_at(LZ4_CHECKSUM_LEN);
    let mut stored = [0u8; LZ4_CHECKSUM_LEN];
    stored.copy_from_slice(sum);
    if u64::from_be_bytes(stored) != checksum(body) {
        return Err(Error::Codec("lz4: checksum mismatch".into()));
    }
    lz4_flex::decompress(body, expected).map_err(|e| Error::Codec(format!("lz4: {e}")))
}

fn decompress_zstd(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut decoder = ruzstd::decoding::StreamingDecoder::new(data)
        .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
    let mut out = Vec::with_capacity(expected);
    decoder.read_to_end(&mut out).map_err(|e| Error::Codec(format!("zstd: {e}")))?;
    Ok(out)
}

fn decompress_xz(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut input = std::io::BufReader::new(data);
    let mut out = Vec::with_capacity(expected);
    lzma_rs::xz_decompress(&mut input, &mut out).map_err(|e| Error::Codec(format!("xz: {e}")))?;
    Ok(out)
}

fn checksum(data: &[u8]) -> u64 {
    let mut h = XxHash64::with_seed(0);
    h.write(data);
    h.finish()
}

fn read_le24(b: &[u8]) -> usize {
    b[0] as usize | ((b[1] as usize) << 8) | ((b[2] as usize) << 16)
}

fn write_le24(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&[(v & 0xFF) as u8, ((v >> 8) & 0xFF) as u8, ((v >> 16) & 0xFF) as u8]);
}
