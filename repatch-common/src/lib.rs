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

use std::{io, rc::Rc};

use deku::prelude::*;
use rsa::{pkcs1, pkcs8};
use zip::result::ZipError;

/// Common error type making it easier to share `Result`s between repatch
/// crates.
///
/// In general designed to avoid needing utilities like `map_err`.
#[derive(Debug, Clone)]
pub enum RepatchError {
    /// repatch-cli encountered an error while processing something specific
    /// to the command line implementation. For example, not enough arguments
    /// were passed via the shell.
    Cli(String),
    /// The PEM blob was readable but didn't contain both a `CERTIFICATE`
    /// section and a private key section (`PRIVATE KEY` or
    /// `RSA PRIVATE KEY`).
    BadCertificate,
    /// The file passed in for signing isn't a ZIP archive we can work with:
    /// the End Of Central Directory marker wasn't found in the trailing
    /// 64 KiB, the central directory didn't parse, or the archive has no
    /// content entries at all.
    MalformedArchive,
    /// An existing `META-INF/MANIFEST.MF` was found during pre-patch hash
    /// collection but it isn't a `Manifest-Version: 1.0` manifest carrying
    /// SHA-256 digests, so none of its digests can be trusted.
    UnsupportedManifest,
    /// An error occurred while reading from or writing to disk. Likely the
    /// target path is invalid, permissions are missing or the disk is full.
    FileIoError(Rc<io::Error>),
    /// The `zip` crate failed while decompressing or enumerating entries.
    ZipReadFailed(Rc<ZipError>),
    /// An error occurred while splitting the `.pem` blob into sections.
    PemParsingFailed(Rc<pem::PemError>),
    /// The `PRIVATE KEY` section was present, but it wasn't a valid PKCS#8
    /// RSA private key.
    PrivateKeyParsingFailed(pkcs8::Error),
    /// The `RSA PRIVATE KEY` section was present, but it wasn't a valid
    /// PKCS#1 RSA private key.
    RsaKeyParsingFailed(pkcs1::Error),
    /// An error occurred while producing an RSA signature, see [rsa::Error].
    SigningFailed(Rc<rsa::Error>),
    /// An error occurred while serialising the RSA public key, see
    /// [pkcs8::spki::Error].
    PublicKeySerialisationFailed(pkcs8::spki::Error),
    /// The signing certificate couldn't be decoded from its DER form.
    CertificateDecodingFailed(Rc<rasn::error::DecodeError>),
    /// The PKCS#7 block for the JAR signature couldn't be serialised.
    Pkcs7EncodingFailed(Rc<rasn::error::EncodeError>),
    /// One of the APK Signing Block structures failed to serialise. See
    /// [DekuError].
    ByteSerialisationFailed(DekuError)
}

/// Result type where the error is always [RepatchError].
pub type Result<T> = std::result::Result<T, RepatchError>;

/// This makes it easier for Result<Something, RepatchError> to be surfaced
/// through string-only reporting channels.
impl From<RepatchError> for String {
    fn from(value: RepatchError) -> Self {
        format!("{:?}", value)
    }
}

// Automatic conversion from other types of error to RepatchError makes the
// rest of the code cleaner
impl From<io::Error> for RepatchError {
    fn from(value: io::Error) -> Self {
        RepatchError::FileIoError(value.into())
    }
}

impl From<ZipError> for RepatchError {
    fn from(value: ZipError) -> Self {
        RepatchError::ZipReadFailed(value.into())
    }
}

impl From<pem::PemError> for RepatchError {
    fn from(value: pem::PemError) -> Self {
        RepatchError::PemParsingFailed(value.into())
    }
}

impl From<pkcs8::Error> for RepatchError {
    fn from(value: pkcs8::Error) -> Self {
        RepatchError::PrivateKeyParsingFailed(value)
    }
}

impl From<pkcs1::Error> for RepatchError {
    fn from(value: pkcs1::Error) -> Self {
        RepatchError::RsaKeyParsingFailed(value)
    }
}

impl From<rsa::Error> for RepatchError {
    fn from(value: rsa::Error) -> Self {
        RepatchError::SigningFailed(value.into())
    }
}

impl From<pkcs8::spki::Error> for RepatchError {
    fn from(value: pkcs8::spki::Error) -> Self {
        RepatchError::PublicKeySerialisationFailed(value)
    }
}

impl From<rasn::error::DecodeError> for RepatchError {
    fn from(value: rasn::error::DecodeError) -> Self {
        RepatchError::CertificateDecodingFailed(value.into())
    }
}

impl From<rasn::error::EncodeError> for RepatchError {
    fn from(value: rasn::error::EncodeError) -> Self {
        RepatchError::Pkcs7EncodingFailed(value.into())
    }
}

impl From<DekuError> for RepatchError {
    fn from(value: DekuError) -> Self {
        RepatchError::ByteSerialisationFailed(value)
    }
}
