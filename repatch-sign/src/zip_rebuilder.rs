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

//! Rebuilds the archive around a fresh set of signatures.
//!
//! The rebuild stream-copies every content entry into a temporary file in
//! the target's directory, dropping old `META-INF/` artifacts and anything
//! between the last entry and the central directory (an APK Signing Block
//! from a previous signer lives there), re-aligning stored entries as their
//! offsets shift, and appending the new v1 artifacts. The v2 signing block
//! is then computed over the rebuilt layout and spliced in just before the
//! central directory. Only the final atomic rename touches the target, so
//! a failure anywhere leaves the original archive intact and the temporary
//! file deleted.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::Path
};

use deku::DekuContainerWrite;
use repatch_common::*;
use repatch_zip::records::{
    locate_eocd, read_cd, CdEntry, Eocd, LocalHeader, FLAG_DATA_DESCRIPTOR, METHOD_STORED
};
use tempfile::NamedTempFile;

use crate::aligner;
use crate::crypto_keys::Keys;
use crate::hasher::compute_top_level_hash;
use crate::signing_block::compute_signing_block;
use crate::v1_signing::META_INF_PREFIX;

/// Artifacts are stamped 1980-01-01 00:00 so that signing identical content
/// twice produces identical bytes.
const ARTIFACT_DOS_TIME: u16 = 0;
const ARTIFACT_DOS_DATE: u16 = 0x0021;

const VERSION_MADE_BY: u16 = 20;
const VERSION_NEEDED: u16 = 20;

/// The source archive's record layout, parsed and validated up front.
pub struct SourceLayout {
    pub eocd: Eocd,
    pub entries: Vec<CdEntry>
}

/// Reads the EOCD and central directory of the archive at `path`.
///
/// This runs before anything destructive: a file that fails here is
/// rejected without being touched.
pub fn read_layout(path: &Path) -> Result<SourceLayout> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let (_, eocd) = locate_eocd(&mut file, file_len)?;
    let entries = read_cd(&mut file, &eocd)?;
    // An archive with nothing but signature artifacts has nothing to sign
    if !entries
        .iter()
        .any(|entry| !entry.name_str().starts_with(META_INF_PREFIX))
    {
        return Err(RepatchError::MalformedArchive);
    }
    Ok(SourceLayout { eocd, entries })
}

/// The rebuilt entry span, waiting for its signing block and trailer.
pub struct RebuiltArchive {
    temp: NamedTempFile,
    entries_end: u64,
    cd_entries: Vec<CdEntry>,
    eocd_template: Eocd
}

/// Copies all content entries plus the new signature artifacts into a
/// temporary file next to `path`, returning it together with the rebuilt
/// central directory records.
pub fn rebuild_entries(
    path: &Path,
    layout: &SourceLayout,
    artifacts: &[(&str, Vec<u8>)]
) -> Result<RebuiltArchive> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new(".")
    };
    let temp = tempfile::Builder::new().prefix(".repatch-").tempfile_in(dir)?;
    let mut source = BufReader::new(File::open(path)?);
    let mut out = BufWriter::new(temp.as_file().try_clone()?);
    let mut out_pos: u64 = 0;
    let mut cd_entries = Vec::with_capacity(layout.entries.len() + artifacts.len());

    for entry in &layout.entries {
        if entry.name_str().starts_with(META_INF_PREFIX) {
            continue;
        }

        source.seek(SeekFrom::Start(entry.local_offset as u64))?;
        let local = LocalHeader::read_from(&mut source)?;

        // Normalise the local header from the central directory record:
        // sizes and CRC become authoritative, so the data descriptor (and
        // its flag bit) can be dropped
        let mut header = LocalHeader {
            version_needed: local.version_needed,
            flags: entry.flags & !FLAG_DATA_DESCRIPTOR,
            method: entry.method,
            mod_time: entry.mod_time,
            mod_date: entry.mod_date,
            crc32: entry.crc32,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            name: entry.name.clone(),
            extra: local.extra
        };
        aligner::align_entry(&mut header, out_pos);
        let header_bytes = header.to_bytes();
        out.write_all(&header_bytes)?;

        // The source is positioned at the payload after reading the header
        copy_exact(&mut source, &mut out, entry.compressed_size as u64)?;

        let mut rebuilt = entry.clone();
        rebuilt.flags = header.flags;
        rebuilt.local_offset = to_offset(out_pos)?;
        cd_entries.push(rebuilt);
        out_pos += header_bytes.len() as u64 + entry.compressed_size as u64;
    }

    for (name, data) in artifacts {
        let mut header = LocalHeader {
            version_needed: VERSION_NEEDED,
            flags: 0,
            method: METHOD_STORED,
            mod_time: ARTIFACT_DOS_TIME,
            mod_date: ARTIFACT_DOS_DATE,
            crc32: crc32fast::hash(data),
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            name: name.as_bytes().to_vec(),
            extra: Vec::new()
        };
        aligner::align_entry(&mut header, out_pos);
        let header_bytes = header.to_bytes();
        out.write_all(&header_bytes)?;
        out.write_all(data)?;

        cd_entries.push(CdEntry {
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_NEEDED,
            flags: 0,
            method: METHOD_STORED,
            mod_time: ARTIFACT_DOS_TIME,
            mod_date: ARTIFACT_DOS_DATE,
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            disk_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            local_offset: to_offset(out_pos)?,
            name: header.name.clone(),
            extra: Vec::new(),
            comment: Vec::new()
        });
        out_pos += header_bytes.len() as u64 + data.len() as u64;
    }

    out.flush()?;
    drop(out);

    Ok(RebuiltArchive {
        temp,
        entries_end: out_pos,
        cd_entries,
        eocd_template: layout.eocd.clone()
    })
}

/// Computes the v2 signature over the rebuilt layout, writes signing block,
/// central directory and EOCD, then atomically replaces `target`.
pub fn splice_signing_block(rebuilt: RebuiltArchive, target: &Path, keys: &Keys) -> Result<()> {
    let RebuiltArchive {
        mut temp,
        entries_end,
        cd_entries,
        eocd_template
    } = rebuilt;

    let mut cd_bytes = Vec::new();
    for entry in &cd_entries {
        cd_bytes.extend_from_slice(&entry.to_bytes());
    }
    let entry_count =
        u16::try_from(cd_entries.len()).map_err(|_| RepatchError::MalformedArchive)?;

    let mut eocd = eocd_template;
    eocd.num_entries = entry_count;
    eocd.total_entries = entry_count;
    eocd.cd_size = to_offset(cd_bytes.len() as u64)?;
    // For hashing, the central directory offset points at the position the
    // signing block will occupy; that is the value a verifier substitutes
    // before digesting the EOCD
    eocd.cd_offset = to_offset(entries_end)?;
    let eocd_for_hash = eocd.to_bytes();

    let file = temp.as_file_mut();
    file.seek(SeekFrom::Start(0))?;
    let top_level_hash = {
        let mut entry_span = BufReader::new(&mut *file);
        compute_top_level_hash(&mut entry_span, entries_end, &cd_bytes, &eocd_for_hash)?
    };

    let signing_block = compute_signing_block(top_level_hash, keys)?;
    let block_bytes = signing_block.to_bytes()?;

    file.seek(SeekFrom::Start(entries_end))?;
    file.write_all(&block_bytes)?;
    file.write_all(&cd_bytes)?;
    eocd.cd_offset = to_offset(entries_end + block_bytes.len() as u64)?;
    file.write_all(&eocd.to_bytes())?;
    file.sync_all()?;

    temp.persist(target).map_err(|e| RepatchError::from(e.error))?;
    Ok(())
}

fn copy_exact<R: Read, W: Write>(source: &mut R, out: &mut W, len: u64) -> Result<()> {
    let copied = io::copy(&mut source.take(len), out)?;
    if copied != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}

fn to_offset(value: u64) -> Result<u32> {
    // Offsets past 4 GiB would need ZIP64 records, which Android APKs never
    // carry
    u32::try_from(value).map_err(|_| RepatchError::MalformedArchive)
}
