//! Body compression (spec §4.E "Compressor").

use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::Write;

use crate::http::types::Encoding;
use crate::limits::COMPRESSION_EXPANSION_ABORT_FACTOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

/// Compresses `bytes` with `encoding` at `level`. Aborts (spec §4.E: "A
/// compression attempt that expands past twice the input's length aborts")
/// when the output would be larger than useful, so the caller can fall back
/// to serving the body uncompressed instead.
pub fn compress(bytes: &[u8], encoding: Encoding, level: u32) -> Result<Vec<u8>, Rejected> {
    let compression = Compression::new(level);
    let out = match encoding {
        Encoding::None => return Err(Rejected),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len()), compression);
            encoder.write_all(bytes).map_err(|_| Rejected)?;
            encoder.finish().map_err(|_| Rejected)?
        }
        Encoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::with_capacity(bytes.len()), compression);
            encoder.write_all(bytes).map_err(|_| Rejected)?;
            encoder.finish().map_err(|_| Rejected)?
        }
    };

    if (out.len() as u64) > bytes.len() as u64 * COMPRESSION_EXPANSION_ABORT_FACTOR {
        return Err(Rejected);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::{DeflateDecoder, GzDecoder};
    use std::io::Read;

    #[test]
    fn gzip_round_trips() {
        let original = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        let compressed = compress(&original, Encoding::Gzip, 6).unwrap();
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn deflate_round_trips() {
        let original = b"repeated repeated repeated repeated data".repeat(20);
        let compressed = compress(&original, Encoding::Deflate, 9).unwrap();
        let mut decoder = DeflateDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn none_is_rejected_outright() {
        assert_eq!(compress(b"hi", Encoding::None, 6), Err(Rejected));
    }

    #[test]
    fn expansion_past_threshold_aborts() {
        // Tiny, high-entropy-looking input at minimum level can expand due
        // to gzip's fixed header/footer overhead dominating a short body.
        let tiny = b"\x01";
        assert_eq!(compress(tiny, Encoding::Gzip, 1), Err(Rejected));
    }
}
