//! Random number source for code paths that must be deterministic
//!
//! Nothing the agent does needs randomness: signatures are deterministic
//! (Ed25519, RFC 6979 ECDSA, PKCS#1 v1.5) and SSH-1 challenge decryption is
//! done without blinding. Crypto APIs that are generic over an RNG are
//! handed this type, so any path that does try to draw randomness is a bug
//! and stops the process.

use rand::{CryptoRng, RngCore};

/// An RNG that panics when used
#[derive(Debug, Clone, Copy, Default)]
pub struct ForbiddenRng;

impl ForbiddenRng {
    fn forbidden() -> ! {
        panic!("internal error: attempt to use random numbers in the agent")
    }
}

impl RngCore for ForbiddenRng {
    fn next_u32(&mut self) -> u32 {
        Self::forbidden()
    }

    fn next_u64(&mut self) -> u64 {
        Self::forbidden()
    }

    fn fill_bytes(&mut self, _dest: &mut [u8]) {
        Self::forbidden()
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
        Self::forbidden()
    }
}

impl CryptoRng for ForbiddenRng {}
