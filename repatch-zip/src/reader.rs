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

//! Read-side access to archive entries through the `zip` crate.
//!
//! Manifest hashing needs the *uncompressed* bytes of every entry, streamed
//! rather than materialised, and in central directory order. The `zip` crate
//! already does lazy decompression well, so this wrapper only narrows its
//! surface to what the signer needs and translates its errors.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path
};

use repatch_common::Result;
use zip::{read::ZipFile, result::ZipError, CompressionMethod, ZipArchive};

/// The metadata the signer cares about for one entry.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub name: String,
    /// DOS date and time packed as `date << 16 | time`, matching
    /// [crate::records::CdEntry::dos_datetime].
    pub dos_datetime: u32,
    pub stored: bool
}

/// An open archive positioned for sequential, central-directory-ordered
/// entry access.
pub struct ArchiveReader {
    archive: ZipArchive<BufReader<File>>
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<ArchiveReader> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(BufReader::new(file))?;
        Ok(ArchiveReader { archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Opens entry `index` (central directory order) for streamed reading.
    pub fn entry(&mut self, index: usize) -> Result<Entry<'_>> {
        let file = self.archive.by_index(index)?;
        let dos_datetime = file
            .last_modified()
            .map(|dt| ((dt.datepart() as u32) << 16) | dt.timepart() as u32)
            .unwrap_or(0);
        let meta = EntryMeta {
            name: file.name().to_string(),
            dos_datetime,
            stored: file.compression() == CompressionMethod::Stored
        };
        Ok(Entry { meta, file })
    }

    /// Reads a whole named entry, or None if the archive doesn't have one.
    pub fn read_file(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(other) => return Err(other.into())
        };
        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents)?;
        Ok(Some(contents))
    }
}

/// One entry mid-iteration. Reading from it decompresses on demand.
pub struct Entry<'a> {
    pub meta: EntryMeta,
    file: ZipFile<'a>
}

impl Read for Entry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}
