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

use std::collections::HashMap;

use repatch_common::*;
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePublicKey},
    RsaPrivateKey, RsaPublicKey
};

/// Holds the certificate and RSA Private Key used for signing.
pub struct Keys {
    /// X.509 Signing Certificate in ASN.1 DER form
    pub certificate: Vec<u8>,
    /// RSA Public Key
    pub public_key: RsaPublicKey,
    /// RSA Private Key
    pub private_key: RsaPrivateKey
}

impl Keys {
    /// Parses and creates an instance of [Keys] from a `.pem` file.
    ///
    /// "Combined" in this case means that the one file has both a `BEGIN
    /// CERTIFICATE` section and a private key section as one long UTF-8
    /// string, in either order. The key may be a PKCS#8 `PRIVATE KEY` or a
    /// PKCS#1 `RSA PRIVATE KEY`; both encodings are seen in the wild for
    /// APK signing identities.
    ///
    /// If you don't have one of these, use
    /// [generate_new_certificate_pem](crate::generate_new_certificate_pem).
    pub fn from_combined_pem_string(combined_pem: &str) -> Result<Keys> {
        let pem_map = parse_pem_map_by_tags(combined_pem)?;
        let certificate = pem_map
            .get("CERTIFICATE")
            .ok_or(RepatchError::BadCertificate)?
            .clone();

        let private_key = if let Some(pkcs8_der) = pem_map.get("PRIVATE KEY") {
            RsaPrivateKey::from_pkcs8_der(pkcs8_der)?
        } else if let Some(pkcs1_der) = pem_map.get("RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_der(pkcs1_der)?
        } else {
            return Err(RepatchError::BadCertificate);
        };
        let public_key = RsaPublicKey::from(private_key.clone());

        Ok(Keys {
            public_key,
            private_key,
            certificate
        })
    }

    /// Returns the RSA Public Key encoded as an ASN.1 DER
    /// SubjectPublicKeyInfo, the form the APK Signing Block embeds.
    pub fn pub_key_as_der(&self) -> Result<Vec<u8>> {
        Ok(self.public_key.to_public_key_der()?.as_ref().to_vec())
    }
}

/// Randomly generates an RSA-2048 signing key and an accompanying
/// self-signed certificate, returned as one combined PEM string.
///
/// The subject is `CN=Unknown` and validity runs from ten years in the past
/// to fifty years in the future. Installing a package signed with a fresh
/// identity means Android will refuse updates over any previously installed
/// build, so callers should generate once and keep the PEM.
///
/// This is slow (tens to hundreds of milliseconds) and is never on the
/// signing hot path.
#[cfg(feature = "cert-gen")]
pub fn generate_new_certificate_pem() -> Result<String> {
    use rand::prelude::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use time::{Duration, OffsetDateTime};

    let private_key = RsaPrivateKey::new(&mut thread_rng(), 2048)?;
    let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?.to_string();

    // Self-sign an X.509 certificate using the fresh key
    let key_pair = KeyPair::from_pem(&private_key_pem).unwrap();
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, "Unknown");
    let mut cert_params = CertificateParams::new(vec![]).unwrap();
    cert_params.distinguished_name = distinguished_name;
    cert_params.not_before = OffsetDateTime::now_utc() - Duration::days(365 * 10);
    cert_params.not_after = OffsetDateTime::now_utc() + Duration::days(365 * 50);
    let cert = cert_params.self_signed(&key_pair).unwrap();

    Ok(format!("{}{}", cert.pem(), private_key_pem))
}

/// Parses a .pem file and returns a map of Tag -> Contents
fn parse_pem_map_by_tags(combined_pem: &str) -> Result<HashMap<String, Vec<u8>>> {
    let parsed = pem::parse_many(combined_pem.trim())?;
    let mut map = HashMap::new();
    for pem_part in parsed {
        map.insert(pem_part.tag().into(), pem_part.into_contents());
    }
    Ok(map)
}
