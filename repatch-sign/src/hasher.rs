// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::{self, Cursor, Read};

use repatch_common::*;
use sha2::{Digest, Sha256};

pub type Sha256Hash = [u8; 32];

pub const BYTES_IN_1MB: u32 = 1024 * 1024;
pub const FIRST_LEVEL_CHUNK_MAGIC: &[u8] = &[0xa5];
pub const SECOND_LEVEL_CHUNK_MAGIC: &[u8] = &[0x5a];

const READ_UNIT: usize = 64 * 1024;

/// Computes the APK Signature Scheme v2 digest over the three spans the
/// scheme covers: the entry data, the central directory and the EOCD.
///
/// The Android Developer documentation calls these chunks 1, 3 and 4 because
/// the APK Signing Block itself is chunk 2. The EOCD passed in here must
/// carry the central directory offset the verifier will substitute, i.e. the
/// offset the signing block will be written at.
pub fn compute_top_level_hash<R: Read>(
    entry_data: &mut R,
    entry_data_len: u64,
    cd: &[u8],
    eocd: &[u8]
) -> Result<Sha256Hash> {
    let mut first_level_hashes = vec![];
    hash_span(entry_data, entry_data_len, &mut first_level_hashes)?;
    hash_span(&mut Cursor::new(cd), cd.len() as u64, &mut first_level_hashes)?;
    hash_span(&mut Cursor::new(eocd), eocd.len() as u64, &mut first_level_hashes)?;

    let mut hasher = Sha256::new();
    hasher.update(SECOND_LEVEL_CHUNK_MAGIC);
    hasher.update((first_level_hashes.len() as u32).to_le_bytes());
    for hash in &first_level_hashes {
        hasher.update(hash);
    }
    Ok(hasher.finalize().into())
}

/// Slices one span into 1 MiB chunks and appends each chunk's digest.
/// Chunks are streamed through a 64 KiB buffer, never held whole.
fn hash_span<R: Read>(source: &mut R, len: u64, out: &mut Vec<Sha256Hash>) -> Result<()> {
    let mut buf = vec![0u8; READ_UNIT];
    let mut remaining = len;
    while remaining > 0 {
        let chunk_len = remaining.min(BYTES_IN_1MB as u64);
        let mut hasher = Sha256::new();
        hasher.update(FIRST_LEVEL_CHUNK_MAGIC);
        hasher.update((chunk_len as u32).to_le_bytes());

        let mut left = chunk_len as usize;
        while left > 0 {
            let want = left.min(READ_UNIT);
            let read = source.read(&mut buf[..want])?;
            if read == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            hasher.update(&buf[..read]);
            left -= read;
        }
        out.push(hasher.finalize().into());
        remaining -= chunk_len;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_chunk_digest(chunk: &[u8]) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(FIRST_LEVEL_CHUNK_MAGIC);
        hasher.update((chunk.len() as u32).to_le_bytes());
        hasher.update(chunk);
        hasher.finalize().into()
    }

    #[test]
    fn short_span_is_one_chunk() {
        let mut out = vec![];
        hash_span(&mut Cursor::new(b"abc"), 3, &mut out).unwrap();
        assert_eq!(out, vec![reference_chunk_digest(b"abc")]);
    }

    #[test]
    fn spans_split_at_one_mebibyte() {
        let data = vec![7u8; BYTES_IN_1MB as usize + 10];
        let mut out = vec![];
        hash_span(&mut Cursor::new(&data), data.len() as u64, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], reference_chunk_digest(&data[..BYTES_IN_1MB as usize]));
        assert_eq!(out[1], reference_chunk_digest(&data[BYTES_IN_1MB as usize..]));
    }

    #[test]
    fn top_level_hash_covers_all_three_spans() {
        let entries = vec![1u8; 100];
        let cd = vec![2u8; 50];
        let eocd = vec![3u8; 22];
        let root =
            compute_top_level_hash(&mut Cursor::new(&entries), 100, &cd, &eocd).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(SECOND_LEVEL_CHUNK_MAGIC);
        hasher.update(3u32.to_le_bytes());
        hasher.update(reference_chunk_digest(&entries));
        hasher.update(reference_chunk_digest(&cd));
        hasher.update(reference_chunk_digest(&eocd));
        let expected: Sha256Hash = hasher.finalize().into();
        assert_eq!(root, expected);
    }
}
