//! Password-keyed XOR stream cipher for tunnel payloads.
//!
//! Each byte is XORed with `password[pos] | pos`, where `pos` walks the
//! password and wraps. A cipher value keeps its position between calls, so
//! one value per stream direction yields one continuous keystream. The
//! transform is its own inverse.
//!
//! This obscures payload bytes from passive inspection. It is not
//! encryption in any cryptographic sense.

use std::sync::Arc;

/// Shared cipher key.
#[derive(Debug, Clone)]
pub struct CipherKey {
    password: Arc<[u8]>,
}

impl CipherKey {
    /// Build a key from a password. An empty password means no cipher.
    pub fn from_password(password: &str) -> Option<Self> {
        if password.is_empty() {
            return None;
        }
        Some(Self {
            password: Arc::from(password.as_bytes()),
        })
    }

    /// Start a new keystream at position zero.
    pub fn stream(&self) -> XorCipher {
        XorCipher {
            password: Arc::clone(&self.password),
            pos: 0,
        }
    }

    /// Apply a fresh keystream to a standalone buffer.
    pub fn apply_once(&self, data: &mut [u8]) {
        self.stream().apply(data);
    }
}

/// One direction of a ciphered stream.
#[derive(Debug, Clone)]
pub struct XorCipher {
    password: Arc<[u8]>,
    pos: usize,
}

impl XorCipher {
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.password[self.pos] | (self.pos as u8);
            self.pos += 1;
            if self.pos == self.password.len() {
                self.pos = 0;
            }
        }
    }
}

/// Apply an optional cipher in place.
pub fn apply(cipher: &mut Option<XorCipher>, data: &mut [u8]) {
    if let Some(cipher) = cipher {
        cipher.apply(data);
    }
}
