use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{AlgorithmError, AlgorithmResult};
use crate::traits::CompressionAlgorithm;

/// zlib (deflate) compression, via `flate2`.
pub struct ZlibCompression;

impl CompressionAlgorithm for ZlibCompression {
    fn name(&self) -> &str {
        "zlib"
    }

    fn max_output_size(&self, input_size: usize) -> usize {
        // zlib's documented worst case: input plus a small fixed overhead
        // plus deflate block-framing for every ~16KiB of input.
        input_size + (input_size / 16_384 + 1) * 5 + 64
    }

    fn compress(&self, input: &[u8], level: u32) -> AlgorithmResult<Vec<u8>> {
        let level = if level == 0 {
            Compression::default()
        } else {
            Compression::new(level.min(9))
        };
        let mut compressor = Compress::new(level, true);
        let mut out = vec![0u8; self.max_output_size(input.len())];
        let status = compressor
            .compress(input, &mut out, FlushCompress::Finish)
            .map_err(|e| AlgorithmError::Compression(e.to_string()))?;
        if status != Status::StreamEnd {
            return Err(AlgorithmError::Compression(
                "compress stream did not finish".into(),
            ));
        }
        out.truncate(compressor.total_out() as usize);
        Ok(out)
    }

    fn decompress(&self, input: &[u8], expected_size: usize) -> AlgorithmResult<Vec<u8>> {
        let mut decompressor = Decompress::new(true);
        let mut out = vec![0u8; expected_size];
        let status = decompressor
            .decompress(input, &mut out, FlushDecompress::Finish)
            .map_err(|e| AlgorithmError::Decompression(e.to_string()))?;
        if status != Status::StreamEnd || decompressor.total_out() as usize != expected_size {
            return Err(AlgorithmError::Decompression(format!(
                "expected {expected_size} bytes, decoded {}",
                decompressor.total_out()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_compressible_data() {
        let alg = ZlibCompression;
        let input = vec![b'a'; 8192];
        let compressed = alg.compress(&input, 0).unwrap();
        assert!(compressed.len() < input.len());
        let decompressed = alg.decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn round_trips_incompressible_data() {
        let alg = ZlibCompression;
        let mut input = vec![0u8; 4096];
        for (i, b) in input.iter_mut().enumerate() {
            *b = (i * 2654435761u32 as usize) as u8;
        }
        let compressed = alg.compress(&input, 0).unwrap();
        let decompressed = alg.decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn rejects_length_mismatch_on_decompress() {
        let alg = ZlibCompression;
        let input = vec![b'x'; 4096];
        let compressed = alg.compress(&input, 0).unwrap();
        assert!(alg.decompress(&compressed, input.len() - 1).is_err());
    }
}
