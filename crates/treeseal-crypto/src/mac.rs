//! Document MAC
//!
//! SHA-512 over every plaintext leaf, in traversal order, each framed as:
//! ```text
//! [1 byte: type tag s|i|f|b|n][8 bytes: length, big-endian][N bytes: canonical plaintext]
//! ```
//! Framing makes the digest sensitive to value boundaries and to scalar type,
//! so `["ab", "c"]` and `["a", "bc"]`, or `"3"` and `3`, never collide.
//! The digest is rendered as uppercase hex before being encrypted into
//! metadata.

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use treeseal_core::{Scalar, ScalarKind};

#[derive(Clone, Default)]
pub struct MacBuilder {
    hasher: Sha512,
}

impl MacBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_scalar(&mut self, scalar: &Scalar) {
        let tag = match scalar.kind() {
            ScalarKind::Str => b's',
            ScalarKind::Int => b'i',
            ScalarKind::Float => b'f',
            ScalarKind::Bool => b'b',
        };
        self.update_framed(tag, scalar.to_plaintext().as_bytes());
    }

    pub fn update_null(&mut self) {
        self.update_framed(b'n', &[]);
    }

    fn update_framed(&mut self, tag: u8, bytes: &[u8]) {
        self.hasher.update([tag]);
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
    }

    pub fn finish(self) -> String {
        hex::encode_upper(self.hasher.finalize())
    }
}

/// Constant-time comparison of two rendered MACs.
pub fn macs_match(computed: &str, stored: &str) -> bool {
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}
