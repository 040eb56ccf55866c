//! Block byte compressors run by the engine's worker pool before handing
//! bytes to the writer (spec.md §2: "drives a throughput-measured,
//! thread-pooled compression writer").
//!
//! `Rle` and `Zip` are adapted from `exr::compression::rle` /
//! `exr::compression::zip`, generalized from "one EXR scanline's worth of
//! interleaved channel bytes" to "one writer block's worth of raw voxel
//! bytes" — a voxel block is already one contiguous run once the remapper
//! has written it, so the channel-interleave step those modules perform
//! does not apply here, but the byte-fragment-separation + delta prefilter
//! (`optimize_bytes`) that makes the deflate stream smaller still does.

use crate::error::Result;

/// Mirrors `exr::Compression`'s knob shape: pick a format and (for `Zip`) a
/// speed/ratio tradeoff, rather than exposing the raw deflate level number.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CompressionLevel {
    Fast,
    Default,
    Best,
}

impl CompressionLevel {
    fn deflate_level(self) -> u8 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Default => 6,
            CompressionLevel::Best => 9,
        }
    }
}

/// The compression format applied to one block's bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Compression {
    Uncompressed,
    Rle,
    Zip(CompressionLevel),
}

impl Compression {
    pub fn compress(self, raw: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Uncompressed => Ok(raw.to_vec()),
            Compression::Rle => Ok(rle::compress_bytes(raw)),
            Compression::Zip(level) => zip::compress_bytes(raw, level),
        }
    }

    pub fn decompress(self, compressed: &[u8], expected_byte_size: usize) -> Result<Vec<u8>> {
        match self {
            Compression::Uncompressed => Ok(compressed.to_vec()),
            Compression::Rle => rle::decompress_bytes(compressed, expected_byte_size),
            Compression::Zip(_) => zip::decompress_bytes(compressed, expected_byte_size),
        }
    }
}

/// Byte-level predictive filters shared by both compressors, ported
/// verbatim from `exr::compression::optimize_bytes` (no EXR-specific
/// assumptions in these helpers — they operate on plain byte slices).
mod optimize_bytes {
    /// Derive over all values in order to produce differences to the
    /// previous value.
    pub fn samples_to_differences(buffer: &mut [u8]) {
        for index in (1..buffer.len()).rev() {
            buffer[index] = (buffer[index] as i32 - buffer[index - 1] as i32 + 128) as u8;
        }
    }

    pub fn differences_to_samples(buffer: &mut [u8]) {
        for index in 1..buffer.len() {
            buffer[index] = (buffer[index - 1] as i32 + buffer[index] as i32 - 128) as u8;
        }
    }

    /// Splits `source` into two interleaved halves (even/odd byte
    /// positions), improving locality for smoothly varying voxel data
    /// before delta-coding.
    pub fn separate_bytes_fragments(source: &[u8]) -> Vec<u8> {
        let mut first_half = Vec::with_capacity(source.len().div_ceil(2));
        let mut second_half = Vec::with_capacity(source.len() / 2);

        for (index, &byte) in source.iter().enumerate() {
            if index % 2 == 0 { first_half.push(byte) } else { second_half.push(byte) }
        }

        first_half.extend(second_half);
        first_half
    }

    /// Inverse of [`separate_bytes_fragments`].
    pub fn interleave_byte_blocks(separated: &[u8]) -> Vec<u8> {
        let mut interleaved = Vec::with_capacity(separated.len());
        let (first_half, second_half) = separated.split_at(separated.len().div_ceil(2));

        let mut firsts = first_half.iter();
        let mut seconds = second_half.iter();
        loop {
            match firsts.next() {
                Some(&byte) => interleaved.push(byte),
                None => break,
            }
            if let Some(&byte) = seconds.next() {
                interleaved.push(byte);
            }
        }
        interleaved
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn fragment_and_interleave_round_trip() {
            let data: Vec<u8> = (0..37).collect();
            let separated = separate_bytes_fragments(&data);
            let restored = interleave_byte_blocks(&separated);
            assert_eq!(restored, data);
        }

        #[test]
        fn difference_round_trip() {
            let mut data: Vec<u8> = vec![10, 200, 3, 250, 0, 128];
            let original = data.clone();
            samples_to_differences(&mut data);
            differences_to_samples(&mut data);
            assert_eq!(data, original);
        }
    }
}

mod rle {
    use super::optimize_bytes::*;
    use crate::error::{Error, Result};

    const MIN_RUN_LENGTH: usize = 3;
    const MAX_RUN_LENGTH: usize = 127;

    pub fn compress_bytes(uncompressed: &[u8]) -> Vec<u8> {
        let mut data = separate_bytes_fragments(uncompressed);
        samples_to_differences(&mut data);

        let mut compressed = Vec::with_capacity(data.len());
        let mut run_start = 0;
        let mut run_end = 1;

        while run_start < data.len() {
            while run_end < data.len()
                && data[run_start] == data[run_end]
                && (run_end - run_start) as i32 - 1 < MAX_RUN_LENGTH as i32
            {
                run_end += 1;
            }

            if run_end - run_start >= MIN_RUN_LENGTH {
                compressed.push(((run_end - run_start) as i32 - 1) as u8);
                compressed.push(data[run_start]);
                run_start = run_end;
            } else {
                while run_end < data.len()
                    && ((run_end + 1 >= data.len() || data[run_end] != data[run_end + 1])
                        || (run_end + 2 >= data.len() || data[run_end + 1] != data[run_end + 2]))
                    && run_end - run_start < MAX_RUN_LENGTH
                {
                    run_end += 1;
                }

                compressed.push((run_start as i32 - run_end as i32) as u8);
                compressed.extend_from_slice(&data[run_start..run_end]);

                run_start = run_end;
                run_end += 1;
            }
        }

        compressed
    }

    pub fn decompress_bytes(compressed: &[u8], expected_byte_size: usize) -> Result<Vec<u8>> {
        let mut remaining = compressed;
        let mut decompressed = Vec::with_capacity(expected_byte_size.min(8 * 2048));

        while !remaining.is_empty() && decompressed.len() != expected_byte_size {
            let count = take_1(&mut remaining)? as i8 as i32;

            if count < 0 {
                let values = take_n(&mut remaining, (-count) as usize)?;
                decompressed.extend_from_slice(values);
            } else {
                let value = take_1(&mut remaining)?;
                decompressed.resize(decompressed.len() + count as usize + 1, value);
            }
        }

        differences_to_samples(&mut decompressed);
        Ok(interleave_byte_blocks(&decompressed))
    }

    fn take_1(slice: &mut &[u8]) -> Result<u8> {
        if slice.is_empty() {
            return Err(Error::writer("truncated rle-compressed block"));
        }
        let result = slice[0];
        *slice = &slice[1..];
        Ok(result)
    }

    fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> Result<&'s [u8]> {
        if n > slice.len() {
            return Err(Error::writer("truncated rle-compressed block"));
        }
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn round_trips_constant_block() {
            let raw = vec![42u8; 4096];
            let compressed = compress_bytes(&raw);
            assert!(compressed.len() < raw.len());
            let restored = decompress_bytes(&compressed, raw.len()).unwrap();
            assert_eq!(restored, raw);
        }

        #[test]
        fn round_trips_random_looking_block() {
            let raw: Vec<u8> = (0..2000).map(|i| ((i * 2654435761u32) >> 24) as u8).collect();
            let compressed = compress_bytes(&raw);
            let restored = decompress_bytes(&compressed, raw.len()).unwrap();
            assert_eq!(restored, raw);
        }
    }
}

mod zip {
    use super::optimize_bytes::*;
    use super::CompressionLevel;
    use crate::error::{Error, Result};

    pub fn compress_bytes(uncompressed: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut packed = separate_bytes_fragments(uncompressed);
        samples_to_differences(&mut packed);
        Ok(miniz_oxide::deflate::compress_to_vec_zlib(&packed, level_value(level)))
    }

    pub fn decompress_bytes(compressed: &[u8], expected_byte_size: usize) -> Result<Vec<u8>> {
        let mut decoder = zune_inflate::DeflateDecoder::new(compressed);
        let mut decompressed = decoder
            .decode_zlib()
            .map_err(|error| Error::writer(format!("zip-compressed block is corrupt: {error}")))?;

        differences_to_samples(&mut decompressed);
        let restored = interleave_byte_blocks(&decompressed);

        if restored.len() != expected_byte_size {
            return Err(Error::writer(format!(
                "zip-compressed block decoded to {} bytes, expected {}",
                restored.len(),
                expected_byte_size
            )));
        }

        Ok(restored)
    }

    fn level_value(level: CompressionLevel) -> u8 {
        level.deflate_level()
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn round_trips_a_block() {
            let raw: Vec<u8> = (0..5000).map(|i| (i % 251) as u8).collect();
            let compressed = compress_bytes(&raw, CompressionLevel::Default).unwrap();
            let restored = decompress_bytes(&compressed, raw.len()).unwrap();
            assert_eq!(restored, raw);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uncompressed_is_a_no_op() {
        let raw = vec![1, 2, 3, 4, 5];
        let compressed = Compression::Uncompressed.compress(&raw).unwrap();
        assert_eq!(compressed, raw);
        let restored = Compression::Uncompressed.decompress(&compressed, raw.len()).unwrap();
        assert_eq!(restored, raw);
    }
}
