//! Deterministic stream cipher over stored blobs.
//!
//! AES-256-CTR keyed by SHA-256 of the mount password. The IV for each
//! blob is the first 16 bytes of its object key, so encryption and
//! decryption need no stored nonce.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use ctr::Ctr128BE;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::node::ObjectKey;

/// AES block size; every object key must carry at least this many bytes.
pub const IV_SIZE: usize = 16;
/// Key size for AES-256.
pub const KEY_SIZE: usize = 32;

type Aes256Ctr = Ctr128BE<Aes256>;

pub struct Cipher {
    key: [u8; KEY_SIZE],
}

impl Cipher {
    pub fn new(password: &str) -> Self {
        Self {
            key: Sha256::digest(password.as_bytes()).into(),
        }
    }

    pub fn encrypt(&self, key: &ObjectKey, buf: &mut [u8]) -> Result<()> {
        self.apply(key, buf)
    }

    pub fn decrypt(&self, key: &ObjectKey, buf: &mut [u8]) -> Result<()> {
        self.apply(key, buf)
    }

    // CTR mode is symmetric: applying the keystream encrypts and
    // decrypts alike.
    fn apply(&self, key: &ObjectKey, buf: &mut [u8]) -> Result<()> {
        let iv = self.iv_for(key)?;
        let mut ctr = Aes256Ctr::new(&self.key.into(), &iv.into());
        ctr.apply_keystream(buf);
        Ok(())
    }

    fn iv_for(&self, key: &ObjectKey) -> Result<[u8; IV_SIZE]> {
        let bytes = key.as_str().as_bytes();
        if bytes.len() < IV_SIZE {
            return Err(Error::BadKey {
                key: key.clone(),
                reason: "object key too short for an IV".to_string(),
            });
        }
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[..IV_SIZE]);
        Ok(iv)
    }
}
