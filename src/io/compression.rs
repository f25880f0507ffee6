//! Pluggable compression for segment data files.
//!
//! Codecs are looked up by name when a table is configured (`"gzip"`, `"zstd"`,
//! `"bzip2"`, `"xz"`, each behind its feature flag) and the chosen name is
//! recorded in the segment statistics so readers can reverse it. Readers that
//! have no recorded name can fall back to magic-byte detection.
//!
//! ## Custom codecs
//! ```
//! use bulkloader::io::compression::{CompressionCodec, codec_by_name, register_codec};
//! use std::io::Read;
//! use std::sync::Arc;
//!
//! struct Identity;
//!
//! impl CompressionCodec for Identity {
//!     fn name(&self) -> &str { "identity" }
//!     fn magic_bytes(&self) -> Option<&[u8]> { None }
//!     fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> { Ok(data.to_vec()) }
//!     fn wrap_reader_dyn(&self, r: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> { Ok(r) }
//! }
//!
//! register_codec(Arc::new(Identity));
//! assert!(codec_by_name("identity").is_ok());
//! ```

use anyhow::{Context, Result, anyhow};
use std::io::{BufRead, BufReader, Read};
use std::sync::{Arc, RwLock};

/// Global codec registry.
static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn CompressionCodec>>>> = RwLock::new(None);

fn builtin_codecs() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
        #[cfg(feature = "compression-bzip2")]
        Arc::new(Bzip2Codec),
        #[cfg(feature = "compression-xz")]
        Arc::new(XzCodec),
    ]
}

fn registry() -> Vec<Arc<dyn CompressionCodec>> {
    let mut lock = match CODEC_REGISTRY.write() {
        Ok(lock) => lock,
        Err(poisoned) => poisoned.into_inner(),
    };
    lock.get_or_insert_with(builtin_codecs).clone()
}

/// Register an additional codec. Later registrations shadow earlier ones of the same name.
pub fn register_codec(codec: Arc<dyn CompressionCodec>) {
    let mut lock = match CODEC_REGISTRY.write() {
        Ok(lock) => lock,
        Err(poisoned) => poisoned.into_inner(),
    };
    lock.get_or_insert_with(builtin_codecs).insert(0, codec);
}

/// A compression algorithm usable for segment data.
pub trait CompressionCodec: Send + Sync {
    /// Name used in table configuration and segment statistics.
    fn name(&self) -> &str;

    /// Signature at the start of compressed output, if the format has one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Compress a complete data block.
    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Wrap a reader with decompression.
    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>>;
}

/// Find a registered codec by name (case-insensitive).
pub fn codec_by_name(name: &str) -> Result<Arc<dyn CompressionCodec>> {
    registry()
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("unknown or disabled compression codec '{name}'"))
}

fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn CompressionCodec>> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    registry().into_iter().find(|codec| {
        codec
            .magic_bytes()
            .is_some_and(|magic| buf.len() >= magic.len() && buf.starts_with(magic))
    })
}

/// Open a decompressing reader.
///
/// With a codec name the named codec is used; without one the stream is sniffed
/// for a known signature and passed through unchanged if none matches.
pub fn open_reader<R: Read + 'static>(reader: R, codec: Option<&str>) -> Result<Box<dyn Read>> {
    if let Some(name) = codec {
        let codec = codec_by_name(name)?;
        return codec
            .wrap_reader_dyn(Box::new(reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    let mut buffered = BufReader::new(reader);
    if let Some(codec) = detect_from_magic(&mut buffered) {
        return codec
            .wrap_reader_dyn(Box::new(buffered))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }
    Ok(Box::new(buffered))
}

// ============================================================================
// Built-in codecs
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;
        let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        enc.write_all(data)?;
        enc.finish()
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use flate2::read::GzDecoder;
        Ok(Box::new(GzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::stream::encode_all(data, 3)
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x42, 0x5a, 0x68])
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        use std::io::Write;
        let mut enc = BzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data)?;
        enc.finish()
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use bzip2::read::BzDecoder;
        Ok(Box::new(BzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use std::io::Write;
        use xz2::write::XzEncoder;
        let mut enc = XzEncoder::new(Vec::new(), 6);
        enc.write_all(data)?;
        enc.finish()
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use xz2::read::XzDecoder;
        Ok(Box::new(XzDecoder::new(reader)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn unknown_codec_is_an_error() {
        assert!(codec_by_name("lzma-turbo").is_err());
    }

    #[test]
    fn uncompressed_stream_passes_through() {
        let mut out = String::new();
        open_reader(Cursor::new(b"plain rows".to_vec()), None)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "plain rows");
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn zstd_is_detected_by_magic() {
        let codec = codec_by_name("ZSTD").unwrap();
        let packed = codec.compress(b"segment payload").unwrap();
        let mut out = Vec::new();
        open_reader(Cursor::new(packed), None)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"segment payload");
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn named_gzip_reader_inflates() {
        let packed = codec_by_name("gzip").unwrap().compress(&[7u8; 4096]).unwrap();
        assert!(packed.len() < 4096);
        let mut out = Vec::new();
        open_reader(Cursor::new(packed), Some("gzip"))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, vec![7u8; 4096]);
    }
}
