//! Encode/decode pipeline around blob I/O.
//!
//! Write path: plaintext → gzip → AES-CTR → bucket. The read path
//! reverses it. Either stage may be disabled by configuration, in which
//! case it is the identity.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::cipher::Cipher;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::ObjectKey;

pub struct Codec {
    cipher: Option<Cipher>,
    compression: bool,
}

impl Codec {
    pub fn new(config: &Config) -> Self {
        Self {
            cipher: config.encryption.then(|| Cipher::new(&config.password)),
            compression: config.compression,
        }
    }

    pub fn encode(&self, key: &ObjectKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut data = if self.compression {
            let mut gz = GzEncoder::new(
                Vec::with_capacity(plaintext.len() / 2),
                Compression::default(),
            );
            gz.write_all(plaintext)?;
            gz.finish()?
        } else {
            plaintext.to_vec()
        };
        if let Some(cipher) = &self.cipher {
            cipher.encrypt(key, &mut data)?;
        }
        Ok(data)
    }

    /// Decryption with a wrong password cannot fail on its own; it
    /// produces garbage that fails here in the gzip stage or later in
    /// JSON decoding. Either way the caller sees [`Error::BadKey`].
    pub fn decode(&self, key: &ObjectKey, blob: &[u8]) -> Result<Vec<u8>> {
        let mut data = blob.to_vec();
        if let Some(cipher) = &self.cipher {
            cipher.decrypt(key, &mut data)?;
        }
        if self.compression {
            let mut plain = Vec::with_capacity(data.len() * 2);
            GzDecoder::new(data.as_slice())
                .read_to_end(&mut plain)
                .map_err(|err| Error::BadKey {
                    key: key.clone(),
                    reason: format!("gunzip: {err}"),
                })?;
            data = plain;
        }
        Ok(data)
    }
}
