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

use std::io::Read;

use crate::crypto_keys::Keys;
use deku::DekuContainerWrite;
use repatch_common::*;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};

pub fn get_signature_for_signed_data<T: DekuContainerWrite>(
    signed_data: &T,
    keys: &Keys
) -> Result<Vec<u8>> {
    let digest = Sha256::digest(signed_data.to_bytes()?);
    let padding = Pkcs1v15Sign::new::<Sha256>();
    Ok(keys.private_key.sign(padding, &digest)?)
}

/// SHA-256 over everything `source` yields, read in 64 KiB units so large
/// entries never sit in memory whole. A fresh hasher per call; digest state
/// is never shared.
pub fn sha256_stream<R: Read>(source: &mut R) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = source.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn streamed_digest_matches_one_shot() {
        let data = vec![0x42u8; 200 * 1024];
        let streamed = sha256_stream(&mut Cursor::new(&data)).unwrap();
        let one_shot: [u8; 32] = Sha256::digest(&data).into();
        assert_eq!(streamed, one_shot);
    }
}
