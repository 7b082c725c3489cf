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

//! Hand-parsed ZIP records.
//!
//! Everything here works on the raw byte layout described in APPNOTE.TXT.
//! Parsing is strict about signatures but otherwise trusts the central
//! directory, which is also what the Android package manager does.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};
use repatch_common::{RepatchError, Result};

pub const EOCD_SIG: u32 = 0x0605_4B50;
pub const CD_ENTRY_SIG: u32 = 0x0201_4B50;
pub const LOCAL_HEADER_SIG: u32 = 0x0403_4B50;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

/// The fixed portion of the EOCD record is 22 bytes; the comment follows.
pub const EOCD_MIN_SIZE: u64 = 22;
/// How far back from the end of the file we are willing to look for the EOCD
/// signature before declaring the archive malformed.
pub const EOCD_SEARCH_LIMIT: u64 = 64 * 1024;

/// Bit 3 of the general purpose flags: sizes and CRC live in a data
/// descriptor after the entry payload instead of in the local header.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// End of Central Directory record.
#[derive(Debug, Clone)]
pub struct Eocd {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub num_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>
}

impl Eocd {
    pub fn parse(buf: &[u8]) -> Result<Eocd> {
        if buf.len() < EOCD_MIN_SIZE as usize {
            return Err(RepatchError::MalformedArchive);
        }
        if LittleEndian::read_u32(&buf[0..4]) != EOCD_SIG {
            return Err(RepatchError::MalformedArchive);
        }
        let comment_len = LittleEndian::read_u16(&buf[20..22]) as usize;
        if buf.len() < EOCD_MIN_SIZE as usize + comment_len {
            return Err(RepatchError::MalformedArchive);
        }
        Ok(Eocd {
            disk_number: LittleEndian::read_u16(&buf[4..6]),
            disk_with_cd: LittleEndian::read_u16(&buf[6..8]),
            num_entries: LittleEndian::read_u16(&buf[8..10]),
            total_entries: LittleEndian::read_u16(&buf[10..12]),
            cd_size: LittleEndian::read_u32(&buf[12..16]),
            cd_offset: LittleEndian::read_u32(&buf[16..20]),
            comment: buf[22..22 + comment_len].to_vec()
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(EOCD_MIN_SIZE as usize + self.comment.len());
        data.extend_from_slice(&EOCD_SIG.to_le_bytes());
        data.extend_from_slice(&self.disk_number.to_le_bytes());
        data.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        data.extend_from_slice(&self.num_entries.to_le_bytes());
        data.extend_from_slice(&self.total_entries.to_le_bytes());
        data.extend_from_slice(&self.cd_size.to_le_bytes());
        data.extend_from_slice(&self.cd_offset.to_le_bytes());
        data.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        data.extend_from_slice(&self.comment);
        data
    }
}

/// Scans backwards from the end of the file for the EOCD signature, one byte
/// at a time, giving up after [EOCD_SEARCH_LIMIT].
///
/// Returns the absolute file offset of the record along with the parsed
/// record itself.
pub fn locate_eocd<R: Read + Seek>(source: &mut R, file_len: u64) -> Result<(u64, Eocd)> {
    if file_len < EOCD_MIN_SIZE {
        return Err(RepatchError::MalformedArchive);
    }
    let tail_len = file_len.min(EOCD_SEARCH_LIMIT + EOCD_MIN_SIZE);
    let tail_start = file_len - tail_len;
    source.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; tail_len as usize];
    source.read_exact(&mut tail)?;

    let mut i = tail.len() - EOCD_MIN_SIZE as usize;
    loop {
        if LittleEndian::read_u32(&tail[i..i + 4]) == EOCD_SIG {
            let eocd = Eocd::parse(&tail[i..])?;
            return Ok((tail_start + i as u64, eocd));
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }
    Err(RepatchError::MalformedArchive)
}

/// One central directory file header.
///
/// The signer reads these to learn each entry's local header position,
/// compression method, CRC, sizes and DOS timestamp, and writes them back out
/// with updated offsets after the archive has been rebuilt.
#[derive(Debug, Clone)]
pub struct CdEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_offset: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>
}

impl CdEntry {
    /// Parses one record from `buf` starting at `*pos`, advancing `*pos`
    /// past it.
    pub fn parse(buf: &[u8], pos: &mut usize) -> Result<CdEntry> {
        let p = *pos;
        if buf.len() < p + 46 {
            return Err(RepatchError::MalformedArchive);
        }
        if LittleEndian::read_u32(&buf[p..p + 4]) != CD_ENTRY_SIG {
            return Err(RepatchError::MalformedArchive);
        }
        let name_len = LittleEndian::read_u16(&buf[p + 28..p + 30]) as usize;
        let extra_len = LittleEndian::read_u16(&buf[p + 30..p + 32]) as usize;
        let comment_len = LittleEndian::read_u16(&buf[p + 32..p + 34]) as usize;
        let end = p + 46 + name_len + extra_len + comment_len;
        if buf.len() < end {
            return Err(RepatchError::MalformedArchive);
        }
        let entry = CdEntry {
            version_made_by: LittleEndian::read_u16(&buf[p + 4..p + 6]),
            version_needed: LittleEndian::read_u16(&buf[p + 6..p + 8]),
            flags: LittleEndian::read_u16(&buf[p + 8..p + 10]),
            method: LittleEndian::read_u16(&buf[p + 10..p + 12]),
            mod_time: LittleEndian::read_u16(&buf[p + 12..p + 14]),
            mod_date: LittleEndian::read_u16(&buf[p + 14..p + 16]),
            crc32: LittleEndian::read_u32(&buf[p + 16..p + 20]),
            compressed_size: LittleEndian::read_u32(&buf[p + 20..p + 24]),
            uncompressed_size: LittleEndian::read_u32(&buf[p + 24..p + 28]),
            disk_start: LittleEndian::read_u16(&buf[p + 34..p + 36]),
            internal_attrs: LittleEndian::read_u16(&buf[p + 36..p + 38]),
            external_attrs: LittleEndian::read_u32(&buf[p + 38..p + 42]),
            local_offset: LittleEndian::read_u32(&buf[p + 42..p + 46]),
            name: buf[p + 46..p + 46 + name_len].to_vec(),
            extra: buf[p + 46 + name_len..p + 46 + name_len + extra_len].to_vec(),
            comment: buf[p + 46 + name_len + extra_len..end].to_vec()
        };
        *pos = end;
        Ok(entry)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(46 + self.name.len() + self.extra.len() + self.comment.len());
        data.extend_from_slice(&CD_ENTRY_SIG.to_le_bytes());
        data.extend_from_slice(&self.version_made_by.to_le_bytes());
        data.extend_from_slice(&self.version_needed.to_le_bytes());
        data.extend_from_slice(&self.flags.to_le_bytes());
        data.extend_from_slice(&self.method.to_le_bytes());
        data.extend_from_slice(&self.mod_time.to_le_bytes());
        data.extend_from_slice(&self.mod_date.to_le_bytes());
        data.extend_from_slice(&self.crc32.to_le_bytes());
        data.extend_from_slice(&self.compressed_size.to_le_bytes());
        data.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        data.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        data.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        data.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        data.extend_from_slice(&self.disk_start.to_le_bytes());
        data.extend_from_slice(&self.internal_attrs.to_le_bytes());
        data.extend_from_slice(&self.external_attrs.to_le_bytes());
        data.extend_from_slice(&self.local_offset.to_le_bytes());
        data.extend_from_slice(&self.name);
        data.extend_from_slice(&self.extra);
        data.extend_from_slice(&self.comment);
        data
    }

    /// The entry name as UTF-8, replacing anything that isn't.
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// DOS date and time packed into one comparable value.
    pub fn dos_datetime(&self) -> u32 {
        ((self.mod_date as u32) << 16) | self.mod_time as u32
    }
}

/// Reads the whole central directory described by `eocd`.
pub fn read_cd<R: Read + Seek>(source: &mut R, eocd: &Eocd) -> Result<Vec<CdEntry>> {
    source.seek(SeekFrom::Start(eocd.cd_offset as u64))?;
    let mut buf = vec![0u8; eocd.cd_size as usize];
    source.read_exact(&mut buf).map_err(|_| RepatchError::MalformedArchive)?;

    let mut entries = Vec::with_capacity(eocd.num_entries as usize);
    let mut pos = 0;
    for _ in 0..eocd.num_entries {
        entries.push(CdEntry::parse(&buf, &mut pos)?);
    }
    Ok(entries)
}

/// Local file header, minus the payload that follows it.
#[derive(Debug, Clone)]
pub struct LocalHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>
}

impl LocalHeader {
    /// Reads the header at the source's current position.
    pub fn read_from<R: Read>(source: &mut R) -> Result<LocalHeader> {
        let mut fixed = [0u8; 30];
        source.read_exact(&mut fixed)?;
        if LittleEndian::read_u32(&fixed[0..4]) != LOCAL_HEADER_SIG {
            return Err(RepatchError::MalformedArchive);
        }
        let name_len = LittleEndian::read_u16(&fixed[26..28]) as usize;
        let extra_len = LittleEndian::read_u16(&fixed[28..30]) as usize;
        let mut name = vec![0u8; name_len];
        source.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        source.read_exact(&mut extra)?;
        Ok(LocalHeader {
            version_needed: LittleEndian::read_u16(&fixed[4..6]),
            flags: LittleEndian::read_u16(&fixed[6..8]),
            method: LittleEndian::read_u16(&fixed[8..10]),
            mod_time: LittleEndian::read_u16(&fixed[10..12]),
            mod_date: LittleEndian::read_u16(&fixed[12..14]),
            crc32: LittleEndian::read_u32(&fixed[14..18]),
            compressed_size: LittleEndian::read_u32(&fixed[18..22]),
            uncompressed_size: LittleEndian::read_u32(&fixed[22..26]),
            name,
            extra
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.size());
        data.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        data.extend_from_slice(&self.version_needed.to_le_bytes());
        data.extend_from_slice(&self.flags.to_le_bytes());
        data.extend_from_slice(&self.method.to_le_bytes());
        data.extend_from_slice(&self.mod_time.to_le_bytes());
        data.extend_from_slice(&self.mod_date.to_le_bytes());
        data.extend_from_slice(&self.crc32.to_le_bytes());
        data.extend_from_slice(&self.compressed_size.to_le_bytes());
        data.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        data.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        data.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        data.extend_from_slice(&self.name);
        data.extend_from_slice(&self.extra);
        data
    }

    /// Total serialised size of this header including name and extra field.
    pub fn size(&self) -> usize {
        30 + self.name.len() + self.extra.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_eocd(comment: &[u8]) -> Vec<u8> {
        let eocd = Eocd {
            disk_number: 0,
            disk_with_cd: 0,
            num_entries: 3,
            total_entries: 3,
            cd_size: 150,
            cd_offset: 0x1234,
            comment: comment.to_vec()
        };
        eocd.to_bytes()
    }

    #[test]
    fn locates_eocd_at_end_of_file() {
        let mut file = vec![0u8; 500];
        file.extend(sample_eocd(b""));
        let len = file.len() as u64;
        let (offset, eocd) = locate_eocd(&mut Cursor::new(&file), len).unwrap();
        assert_eq!(offset, 500);
        assert_eq!(eocd.cd_offset, 0x1234);
        assert_eq!(eocd.num_entries, 3);
    }

    #[test]
    fn locates_eocd_behind_a_comment() {
        let mut file = vec![0u8; 100];
        file.extend(sample_eocd(b"trailing comment"));
        let len = file.len() as u64;
        let (offset, eocd) = locate_eocd(&mut Cursor::new(&file), len).unwrap();
        assert_eq!(offset, 100);
        assert_eq!(eocd.comment, b"trailing comment");
    }

    #[test]
    fn missing_eocd_is_malformed() {
        let file = vec![0u8; 4096];
        let len = file.len() as u64;
        assert!(matches!(
            locate_eocd(&mut Cursor::new(&file), len),
            Err(RepatchError::MalformedArchive)
        ));
    }

    #[test]
    fn eocd_outside_search_window_is_not_found() {
        let mut file = sample_eocd(b"");
        // Push the record more than 64 KiB away from EOF
        file.extend(vec![0u8; (EOCD_SEARCH_LIMIT + 1024) as usize]);
        let len = file.len() as u64;
        assert!(matches!(
            locate_eocd(&mut Cursor::new(&file), len),
            Err(RepatchError::MalformedArchive)
        ));
    }

    #[test]
    fn cd_entry_round_trips() {
        let entry = CdEntry {
            version_made_by: 20,
            version_needed: 20,
            flags: 0,
            method: METHOD_DEFLATED,
            mod_time: 0x7A3C,
            mod_date: 0x58A1,
            crc32: 0xDEADBEEF,
            compressed_size: 120,
            uncompressed_size: 300,
            disk_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            local_offset: 0x400,
            name: b"lib/arm64-v8a/libmain.so".to_vec(),
            extra: vec![0, 0, 4, 0, 1, 2, 3, 4],
            comment: Vec::new()
        };
        let bytes = entry.to_bytes();
        let mut pos = 0;
        let parsed = CdEntry::parse(&bytes, &mut pos).unwrap();
        assert_eq!(pos, bytes.len());
        assert_eq!(parsed.name, entry.name);
        assert_eq!(parsed.extra, entry.extra);
        assert_eq!(parsed.crc32, entry.crc32);
        assert_eq!(parsed.local_offset, entry.local_offset);
        assert_eq!(parsed.dos_datetime(), 0x58A1_7A3C);
    }

    #[test]
    fn local_header_round_trips() {
        let header = LocalHeader {
            version_needed: 20,
            flags: 0,
            method: METHOD_STORED,
            mod_time: 0,
            mod_date: 0x21,
            crc32: 0xCAFEBABE,
            compressed_size: 6,
            uncompressed_size: 6,
            name: b"assets/x.bin".to_vec(),
            extra: vec![0; 3]
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), header.size());
        let parsed = LocalHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed.name, header.name);
        assert_eq!(parsed.extra, header.extra);
        assert_eq!(parsed.compressed_size, 6);
    }

    #[test]
    fn truncated_cd_entry_is_malformed() {
        let bytes = vec![0x50, 0x4B, 0x01, 0x02, 0x14, 0x00];
        let mut pos = 0;
        assert!(matches!(
            CdEntry::parse(&bytes, &mut pos),
            Err(RepatchError::MalformedArchive)
        ));
    }
}
