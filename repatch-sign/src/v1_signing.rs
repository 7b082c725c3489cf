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

//! Most of this package is concerned with APK Signature Scheme v2, but this
//! module handles Signature Scheme v1, aka. Signed JAR File format.
//!
//! Three artifacts make up a v1 signature: `META-INF/MANIFEST.MF` carries a
//! SHA-256 digest of every content entry, `META-INF/BS.SF` digests the
//! manifest's individual sections, and `META-INF/BS.RSA` is a detached
//! PKCS#7 signature over the whole signature file.
//!
//! Hashing every entry of a large archive on every repatch would dominate
//! signing time, so digests recorded by a previous pass can be fed back in;
//! an entry whose DOS timestamp is unchanged reuses its recorded digest
//! instead of being streamed again.

use std::collections::HashMap;

use base64::{prelude::BASE64_STANDARD, Engine};
use rasn::types::Integer::Primitive;
use rasn::types::{Any, Oid};
use rasn_cms::algorithms::RSA;
use rasn_cms::ContentInfo;
use rasn_cms::{
    pkcs7_compat::SignedData, Certificate, CertificateChoices, IssuerAndSerialNumber,
    SignerIdentifier, SignerInfo
};
use repatch_common::*;
use repatch_zip::ArchiveReader;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};

use crate::crypto::sha256_stream;
use crate::crypto_keys::Keys;

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
pub const SIGNATURE_FILE_NAME: &str = "META-INF/BS.SF";
pub const RSA_BLOCK_NAME: &str = "META-INF/BS.RSA";

/// Entry names under this prefix are signature artifacts, not content.
pub const META_INF_PREFIX: &str = "META-INF/";

const CREATED_BY: &str = "repatch";

const OID_SHA256: &Oid =
    rasn::types::Oid::JOINT_ISO_ITU_T_COUNTRY_US_ORGANIZATION_GOV_CSOR_NIST_ALGORITHMS_HASH_SHA256;
const OID_PKCS7_DATA: &Oid = rasn::types::Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_DATA;
const OID_PKCS7_SIGNED_DATA: &Oid = rasn::types::Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_SIGNED_DATA;

/// A digest of an entry's uncompressed contents recorded by an earlier pass,
/// trusted for as long as the entry's DOS timestamp still matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrePatchHash {
    /// base64 of the entry's 32-byte SHA-256.
    pub digest_b64: String,
    /// The entry's DOS date and time, packed as `date << 16 | time`.
    pub last_modified: u32
}

/// One manifest section: the exact bytes later digested by the signature
/// file, blank-line terminator included.
pub struct ManifestSection {
    pub name: String,
    pub bytes: Vec<u8>
}

pub struct ManifestOutcome {
    /// The complete MANIFEST.MF byte stream.
    pub manifest: Vec<u8>,
    pub sections: Vec<ManifestSection>,
    /// How many entries were stream-hashed rather than served from the
    /// pre-patch cache.
    pub streamed_hashes: usize
}

/// Builds MANIFEST.MF over every content entry, in central directory order.
///
/// Line endings are CRLF throughout and long lines are not wrapped; the
/// parser side accepts wrapped continuation lines, this writer never emits
/// them.
pub fn create_manifest(
    archive: &mut ArchiveReader,
    known_hashes: Option<&HashMap<String, PrePatchHash>>
) -> Result<ManifestOutcome> {
    let mut manifest =
        format!("Manifest-Version: 1.0\r\nCreated-By: {CREATED_BY}\r\n\r\n").into_bytes();
    let mut sections = Vec::new();
    let mut streamed_hashes = 0;

    for index in 0..archive.len() {
        let mut entry = archive.entry(index)?;
        if entry.meta.name.starts_with(META_INF_PREFIX) {
            continue;
        }

        let cached = known_hashes
            .and_then(|hashes| hashes.get(&entry.meta.name))
            .filter(|hash| hash.last_modified == entry.meta.dos_datetime);
        let digest_b64 = match cached {
            Some(hit) => hit.digest_b64.clone(),
            None => {
                streamed_hashes += 1;
                let digest = sha256_stream(&mut entry)?;
                BASE64_STANDARD.encode(digest)
            }
        };

        let name = entry.meta.name.clone();
        let bytes = format!("Name: {name}\r\nSHA-256-Digest: {digest_b64}\r\n\r\n").into_bytes();
        manifest.extend_from_slice(&bytes);
        sections.push(ManifestSection { name, bytes });
    }

    Ok(ManifestOutcome {
        manifest,
        sections,
        streamed_hashes
    })
}

/// Builds BS.SF: a digest of the whole manifest, then one per section.
pub fn create_signature_file(outcome: &ManifestOutcome) -> Vec<u8> {
    let manifest_digest = b64_digest(&outcome.manifest);
    let mut output_sig = format!(
        "Signature-Version: 1.0\r\nSHA-256-Digest-Manifest: {manifest_digest}\r\nCreated-By: {CREATED_BY}\r\nX-Android-APK-Signed: 2\r\n\r\n"
    )
    .into_bytes();

    for section in &outcome.sections {
        let name = &section.name;
        let digest = b64_digest(&section.bytes);
        output_sig
            .extend_from_slice(format!("Name: {name}\r\nSHA-256-Digest: {digest}\r\n\r\n").as_bytes());
    }

    output_sig
}

/// Generates the PKCS#7 SignedData structure (BS.RSA): a detached RSA
/// signature over the signature file, with the signing certificate embedded.
pub fn create_pkcs7_file(sig_file: &[u8], keys: &Keys) -> Result<Vec<u8>> {
    let digest = Sha256::digest(sig_file);
    let padding = Pkcs1v15Sign::new::<Sha256>();
    let signature = keys.private_key.sign(padding, &digest)?;

    let cert = rasn::der::decode::<Certificate>(&keys.certificate)?;

    let signer_info = SignerInfo {
        version: Primitive(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone()
        }),
        digest_algorithm: rasn_cms::AlgorithmIdentifier {
            algorithm: OID_SHA256.into(),
            parameters: None
        },
        signed_attrs: None,
        signature_algorithm: rasn_cms::AlgorithmIdentifier {
            algorithm: RSA.into(),
            parameters: None
        },
        signature: signature.into(),
        unsigned_attrs: None
    };

    let signed_data = SignedData {
        version: Primitive(1),
        digest_algorithms: vec![rasn_cms::AlgorithmIdentifier {
            algorithm: OID_SHA256.into(),
            parameters: None
        }]
        .into(),
        encap_content_info: rasn_cms::pkcs7_compat::EncapsulatedContentInfo {
            content_type: OID_PKCS7_DATA.into(),
            // Detached: the signature file itself lives next to us in the
            // archive
            content: None
        },
        certificates: Some(vec![CertificateChoices::Certificate(Box::new(cert))].into()),
        crls: None,
        signer_infos: vec![signer_info].into()
    };

    let inner_vec = rasn::der::encode(&signed_data)?;

    let wrapper = ContentInfo {
        content_type: OID_PKCS7_SIGNED_DATA.into(),
        content: Any::new(inner_vec)
    };

    Ok(rasn::der::encode(&wrapper)?)
}

/// Parses an existing MANIFEST.MF into `name -> digest` pairs.
///
/// Manifests written by other signers come in many shapes: wrapped
/// continuation lines, LF instead of CRLF, extra attributes per section.
/// Parsing is best-effort; on the first section that doesn't carry a usable
/// `Name`/`SHA-256-Digest` pair, whatever was parsed so far is returned.
/// A manifest that isn't `Manifest-Version: 1.0` at all is refused with
/// [RepatchError::UnsupportedManifest].
pub fn parse_manifest(bytes: &[u8]) -> Result<HashMap<String, String>> {
    let text = String::from_utf8_lossy(bytes);
    let mut paragraphs = split_paragraphs(&text);
    if paragraphs.is_empty() {
        return Err(RepatchError::UnsupportedManifest);
    }

    let header = paragraphs.remove(0);
    if !header.iter().any(|line| line == "Manifest-Version: 1.0") {
        return Err(RepatchError::UnsupportedManifest);
    }

    let mut digests = HashMap::new();
    'sections: for section in paragraphs {
        let mut name = None;
        let mut digest = None;
        for line in &section {
            match line.split_once(": ") {
                Some(("Name", value)) => name = Some(value.to_string()),
                Some(("SHA-256-Digest", value)) => digest = Some(value.to_string()),
                // Unknown attributes are harmless
                Some(_) => {}
                None => break 'sections
            }
        }
        match (name, digest) {
            (Some(name), Some(digest)) => {
                digests.insert(name, digest);
            }
            // No usable digest pair, e.g. a SHA-1 manifest. Stop trusting
            // the rest.
            _ => break
        }
    }
    Ok(digests)
}

/// Splits manifest text into paragraphs of logical lines. A physical line
/// starting with a single space continues the previous logical line.
fn split_paragraphs(text: &str) -> Vec<Vec<String>> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        match (line.strip_prefix(' '), current.last_mut()) {
            (Some(continuation), Some(last)) => last.push_str(continuation),
            _ => current.push(line.to_string())
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

fn b64_digest(input: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(input);
    BASE64_STANDARD.encode(digest)
}
