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

//! 4-byte alignment of stored entries.
//!
//! Android mmaps uncompressed entries (native libraries, resources.arsc)
//! straight out of the installed APK and rejects a v2-signed archive whose
//! stored payloads are misaligned. Deflated entries are inflated on read and
//! never mapped, so they are left alone.
//!
//! The padding lives inside the local header's extra field, which keeps the
//! rest of the record layout untouched.

use repatch_zip::records::{LocalHeader, METHOD_STORED};

pub const ALIGNMENT: u64 = 4;

/// Zero bytes needed in front of a payload at `payload_offset`.
pub fn padding_for(payload_offset: u64) -> usize {
    ((ALIGNMENT - payload_offset % ALIGNMENT) % ALIGNMENT) as usize
}

/// Grows a stored entry's extra field with zero bytes so that its payload
/// starts on a 4-byte boundary, given the offset the header will be written
/// at. Returns the number of bytes inserted.
pub fn align_entry(header: &mut LocalHeader, header_offset: u64) -> usize {
    if header.method != METHOD_STORED {
        return 0;
    }
    let payload_offset = header_offset + header.size() as u64;
    let padding = padding_for(payload_offset);
    header.extra.resize(header.extra.len() + padding, 0);
    padding
}

#[cfg(test)]
mod tests {
    use super::*;
    use repatch_zip::records::METHOD_DEFLATED;

    fn stored_header(name_len: usize) -> LocalHeader {
        LocalHeader {
            version_needed: 20,
            flags: 0,
            method: METHOD_STORED,
            mod_time: 0,
            mod_date: 0x21,
            crc32: 0,
            compressed_size: 8,
            uncompressed_size: 8,
            name: vec![b'x'; name_len],
            extra: Vec::new()
        }
    }

    #[test]
    fn aligned_payloads_need_no_padding() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(4), 0);
        assert_eq!(padding_for(0x1A8), 0);
    }

    #[test]
    fn misaligned_payloads_round_up() {
        assert_eq!(padding_for(1), 3);
        assert_eq!(padding_for(2), 2);
        assert_eq!(padding_for(0x1A7), 1);
    }

    #[test]
    fn stored_entries_gain_extra_field_padding() {
        // Header at 0 with a 7-byte name puts the payload at 37
        let mut header = stored_header(7);
        let inserted = align_entry(&mut header, 0);
        assert_eq!(inserted, 3);
        assert_eq!(header.extra, vec![0, 0, 0]);
        assert_eq!((header.size() as u64) % ALIGNMENT, 0);
    }

    #[test]
    fn deflated_entries_are_left_alone() {
        let mut header = stored_header(7);
        header.method = METHOD_DEFLATED;
        assert_eq!(align_entry(&mut header, 0), 0);
        assert!(header.extra.is_empty());
    }
}
