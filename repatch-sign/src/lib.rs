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

//! # repatch-sign
//!
//! Signs a patched APK in place so that Android will install it: JAR (v1)
//! manifest signing, 4-byte alignment of stored entries and an APK
//! Signature Scheme v2 block, in that order.
//!
//! ## Signing an APK
//!
//! ```no_run
//! use std::path::Path;
//!
//! let pem = std::fs::read_to_string("keys.pem").unwrap();
//! repatch_sign::sign_apk(Path::new("app.apk"), &pem, None).unwrap();
//! ```
//!
//! Where `keys.pem` contains both a `-----BEGIN CERTIFICATE-----` section
//! and a private key section. Alternatively,
//! [sign_apk_with_builtin_cert] signs with the debug identity compiled into
//! this crate.
//!
//! ## Speeding up repeated signing
//!
//! Hosts that unpack, patch and re-sign the same archive repeatedly can
//! collect the per-entry digests of the previous signature before patching
//! and pass them back in, so only entries the patch actually touched get
//! re-hashed:
//!
//! ```no_run
//! use std::path::Path;
//!
//! let path = Path::new("app.apk");
//! let known = repatch_sign::collect_pre_patch_hashes(path).unwrap();
//! // ... patch the archive contents ...
//! repatch_sign::sign_apk_with_builtin_cert(path, known.as_ref()).unwrap();
//! ```

use std::{collections::HashMap, path::Path};

use repatch_common::*;
use repatch_zip::ArchiveReader;

pub mod aligner;
mod crypto;
pub mod crypto_keys;
mod hasher;
mod signed_data_block;
mod signing_block;
mod signing_types;
pub mod v1_signing;
mod zip_rebuilder;

#[cfg(feature = "cert-gen")]
pub use crypto_keys::generate_new_certificate_pem;
pub use crypto_keys::Keys;
pub use v1_signing::PrePatchHash;

/// The debug signing identity compiled into this crate, used when the host
/// doesn't supply its own PEM. Suitable for sideloaded test builds only;
/// anything distributed should be signed with caller-provided keys.
pub const BUILTIN_CERTIFICATE_PEM: &str = include_str!("../resources/debug_cert.pem");

/// Signs the APK at `path` in place with the supplied combined PEM.
///
/// `known_hashes` is an optional cache of per-entry digests collected from
/// the archive's previous signature (see [collect_pre_patch_hashes]);
/// entries whose timestamps still match skip re-hashing.
///
/// The target file is replaced atomically as the final step. On any error
/// the original archive is left exactly as it was.
pub fn sign_apk(
    path: &Path,
    pem_text: &str,
    known_hashes: Option<&HashMap<String, PrePatchHash>>
) -> Result<()> {
    let keys = Keys::from_combined_pem_string(pem_text)?;
    sign_apk_with_keys(path, &keys, known_hashes)
}

/// Signs the APK at `path` in place with [BUILTIN_CERTIFICATE_PEM].
pub fn sign_apk_with_builtin_cert(
    path: &Path,
    known_hashes: Option<&HashMap<String, PrePatchHash>>
) -> Result<()> {
    sign_apk(path, BUILTIN_CERTIFICATE_PEM, known_hashes)
}

/// Signs with already-loaded [Keys]. Useful when one identity signs many
/// archives.
pub fn sign_apk_with_keys(
    path: &Path,
    keys: &Keys,
    known_hashes: Option<&HashMap<String, PrePatchHash>>
) -> Result<()> {
    // Parse the raw record layout first so malformed input is rejected
    // before any work happens
    let layout = zip_rebuilder::read_layout(path)?;

    // JAR (v1) artifacts come from a read-only hashing pass; the archive is
    // closed again before the rebuild opens it
    let outcome = {
        let mut archive = ArchiveReader::open(path)?;
        v1_signing::create_manifest(&mut archive, known_hashes)?
    };
    let sig_file = v1_signing::create_signature_file(&outcome);
    let rsa_block = v1_signing::create_pkcs7_file(&sig_file, keys)?;
    let artifacts = [
        (v1_signing::MANIFEST_NAME, outcome.manifest),
        (v1_signing::SIGNATURE_FILE_NAME, sig_file),
        (v1_signing::RSA_BLOCK_NAME, rsa_block)
    ];

    // Rebuild with old signatures dropped, stored entries aligned and the
    // new artifacts appended, then splice in the v2 signing block and
    // atomically replace the target
    let rebuilt = zip_rebuilder::rebuild_entries(path, &layout, &artifacts)?;
    zip_rebuilder::splice_signing_block(rebuilt, path, keys)
}

/// Reads the digests recorded in an archive's existing `MANIFEST.MF`,
/// pairing each with the entry's current DOS timestamp.
///
/// Returns `Ok(None)` when the archive carries no manifest, or one this
/// signer can't vouch for (wrong version, non-SHA-256 digests, nothing
/// parseable). Callers fall back to full re-hashing in that case, so an
/// unusual manifest is never an error here.
pub fn collect_pre_patch_hashes(path: &Path) -> Result<Option<HashMap<String, PrePatchHash>>> {
    let mut archive = ArchiveReader::open(path)?;
    let manifest = match archive.read_file(v1_signing::MANIFEST_NAME)? {
        Some(bytes) => bytes,
        None => return Ok(None)
    };
    let digests = match v1_signing::parse_manifest(&manifest) {
        Ok(digests) => digests,
        Err(RepatchError::UnsupportedManifest) => return Ok(None),
        Err(other) => return Err(other)
    };
    if digests.is_empty() {
        return Ok(None);
    }

    let mut hashes = HashMap::new();
    for index in 0..archive.len() {
        let entry = archive.entry(index)?;
        if let Some(digest_b64) = digests.get(&entry.meta.name) {
            hashes.insert(
                entry.meta.name.clone(),
                PrePatchHash {
                    digest_b64: digest_b64.clone(),
                    last_modified: entry.meta.dos_datetime
                }
            );
        }
    }
    Ok(Some(hashes))
}
