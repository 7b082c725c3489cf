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

use std::{env, fs, path::PathBuf};

use repatch_common::{RepatchError, Result};
use repatch_sign::{collect_pre_patch_hashes, sign_apk, sign_apk_with_builtin_cert};

/// Re-signs a patched APK in place so a device will install it.
///
/// ```
/// $ repatch app.apk
/// ```
///
/// signs with the built-in debug identity. To sign with your own keys:
///
/// ```
/// $ repatch app.apk keys.pem
/// ```
///
/// Where `keys.pem` is a PEM-format file containing both a
/// `-----BEGIN CERTIFICATE-----` section and a private key section. To mint
/// a fresh identity for later use:
///
/// ```
/// $ repatch --new-cert keys.pem
/// ```
fn main() -> Result<()> {
    let first = env::args()
        .nth(1)
        .ok_or(RepatchError::Cli("APK path not provided".into()))?;

    if first == "--new-cert" {
        let out_path = env::args()
            .nth(2)
            .ok_or(RepatchError::Cli("Output PEM path not provided".into()))?;
        let pem = repatch_sign::generate_new_certificate_pem()?;
        fs::write(&out_path, pem)?;
        println!("Wrote a new signing identity to {out_path}");
        return Ok(());
    }

    let apk_path = PathBuf::from(&first);

    // Digests recorded by a previous signature save re-hashing unchanged
    // entries; an unsigned or foreign archive just hashes everything
    let known_hashes = collect_pre_patch_hashes(&apk_path)?;

    match env::args().nth(2) {
        Some(pem_path) => {
            let pem_bytes = fs::read(pem_path)?;
            let pem_str = String::from_utf8(pem_bytes)
                .map_err(|_e| RepatchError::Cli("Key PEM file is not valid UTF-8".into()))?;
            sign_apk(&apk_path, &pem_str, known_hashes.as_ref())?;
        }
        None => sign_apk_with_builtin_cert(&apk_path, known_hashes.as_ref())?
    }

    println!("Signed {:?} successfully!", apk_path);
    Ok(())
}
