//! Message authentication. The MAC primitive is intentionally a black box
//! behind the [`Mac`] trait — swapping the algorithm never touches the
//! wire codec or the engines, only which `Mac` impl a HAL wires in.

/// Fixed-size authentication tag.
pub const TAG_LEN: usize = 32;

/// A keyed message authentication code.
pub trait Mac {
    /// Install (or replace) the shared key.
    fn set_key(&mut self, key: &[u8]);

    /// Zero the key material.
    fn clear_key(&mut self);

    /// Compute the tag for `message`.
    fn compute(&self, message: &[u8]) -> [u8; TAG_LEN];

    /// Verify `tag` against `message`, in constant time with respect to
    /// the tag's content (an attacker observing only comparison timing
    /// shouldn't learn anything about which bytes matched).
    fn verify(&self, message: &[u8], tag: &[u8; TAG_LEN]) -> bool {
        let computed = self.compute(message);
        let mut diff = 0u8;
        for (a, b) in computed.iter().zip(tag.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

/// Reference [`Mac`] implementation backed by keyed BLAKE3.
#[cfg(feature = "mac-blake3")]
pub struct Blake3Mac {
    key: [u8; 32],
}

#[cfg(feature = "mac-blake3")]
impl Blake3Mac {
    pub fn new() -> Self {
        Self { key: [0u8; 32] }
    }
}

#[cfg(feature = "mac-blake3")]
impl Default for Blake3Mac {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "mac-blake3")]
impl Mac for Blake3Mac {
    fn set_key(&mut self, key: &[u8]) {
        let len = key.len().min(self.key.len());
        self.key = [0u8; 32];
        self.key[..len].copy_from_slice(&key[..len]);
    }

    fn clear_key(&mut self) {
        self.key = [0u8; 32];
    }

    fn compute(&self, message: &[u8]) -> [u8; TAG_LEN] {
        *blake3::keyed_hash(&self.key, message).as_bytes()
    }
}
