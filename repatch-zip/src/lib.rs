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

//! ZIP plumbing for repatch.
//!
//! The signing pipeline needs two very different views of the same archive:
//!
//!  - Raw record access (End Of Central Directory, central directory records,
//!    local file headers) so that entries can be relocated, re-aligned and
//!    appended without ever recompressing anything. That lives in [records].
//!  - Decompressed entry contents for JAR manifest hashing, which we get from
//!    the `zip` crate through the thin wrapper in [reader].

pub mod reader;
pub mod records;

pub use reader::{ArchiveReader, Entry, EntryMeta};
pub use records::{
    locate_eocd, read_cd, CdEntry, Eocd, LocalHeader, CD_ENTRY_SIG, EOCD_SIG, LOCAL_HEADER_SIG,
    METHOD_DEFLATED, METHOD_STORED
};
