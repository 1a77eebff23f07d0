//! SSH-1 RSA keys
//!
//! SSH-1 keys only ever answer RSA challenges. Their public blob (the key
//! store's sort key) is `uint32 bits ‖ mpint1 e ‖ mpint1 n`.

use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};

use kh_protocol::{DecodeError, WireReader, WireWrite};

use super::rng::ForbiddenRng;
use super::KeyError;

/// Length of the session identifier in an RSA challenge
pub const SESSION_ID_LEN: usize = 16;

/// Public half of an SSH-1 RSA key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ssh1PublicKey {
    e: BigUint,
    n: BigUint,
}

impl Ssh1PublicKey {
    /// Read a public key in exponent-first order: `uint32 bits, e, n`
    ///
    /// The declared bit count is not trusted; the blob is rebuilt from the
    /// modulus.
    pub fn decode(reader: &mut WireReader) -> Result<Self, DecodeError> {
        let _bits = reader.get_u32("key bits")?;
        let e = reader.get_mpint1("public exponent")?;
        let n = reader.get_mpint1("modulus")?;
        Ok(Self {
            e: BigUint::from_bytes_be(&e),
            n: BigUint::from_bytes_be(&n),
        })
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.n.bits()
    }

    /// Canonical public blob
    pub fn blob(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(self.bits() as u32);
        buf.put_mpint1(&self.e.to_bytes_be());
        buf.put_mpint1(&self.n.to_bytes_be());
        buf.freeze()
    }

    /// Traditional SSH-1 fingerprint: bit count and MD5 of `n ‖ e`
    pub fn fingerprint(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.n.to_bytes_be());
        hasher.update(self.e.to_bytes_be());
        let digest = hasher.finalize();
        let hex: Vec<String> = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{} {}", self.bits(), hex.join(":"))
    }
}

/// An SSH-1 RSA private key
pub struct Ssh1Key {
    key: RsaPrivateKey,
    public: Ssh1PublicKey,
    comment: String,
}

impl std::fmt::Debug for Ssh1Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh1Key")
            .field("public", &self.public)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

impl Ssh1Key {
    /// Build a key from its components, checking that they are consistent
    pub fn from_components(
        n: BigUint,
        e: BigUint,
        d: BigUint,
        p: BigUint,
        q: BigUint,
        comment: String,
    ) -> Result<Self, KeyError> {
        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|_| KeyError::Invalid)?;
        key.validate().map_err(|_| KeyError::Invalid)?;
        let public = Ssh1PublicKey {
            e: key.e().clone(),
            n: key.n().clone(),
        };
        Ok(Self {
            key,
            public,
            comment,
        })
    }

    /// Decode the body of `SSH1_AGENTC_ADD_RSA_IDENTITY`:
    /// `uint32 bits, n, e, d, iqmp, q, p, string comment`
    pub fn decode_agent(reader: &mut WireReader) -> Result<Self, KeyError> {
        let _bits = reader.get_u32("key bits")?;
        let n = reader.get_mpint1("modulus")?;
        let e = reader.get_mpint1("public exponent")?;
        let d = reader.get_mpint1("private exponent")?;
        let _iqmp = reader.get_mpint1("iqmp")?;
        let q = reader.get_mpint1("prime q")?;
        let p = reader.get_mpint1("prime p")?;
        let comment = reader.get_text_lossy("comment")?;

        Self::from_components(
            BigUint::from_bytes_be(&n),
            BigUint::from_bytes_be(&e),
            BigUint::from_bytes_be(&d),
            BigUint::from_bytes_be(&p),
            BigUint::from_bytes_be(&q),
            comment,
        )
    }

    /// Public half
    pub fn public(&self) -> &Ssh1PublicKey {
        &self.public
    }

    /// Key comment
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Answer an RSA challenge
    ///
    /// The challenge is decrypted with the private key; the response is the
    /// MD5 of the low 32 bytes of the plaintext (big-endian) followed by the
    /// session identifier.
    pub fn respond(&self, challenge: &[u8], session_id: &[u8]) -> Result<[u8; 16], KeyError> {
        let c = BigUint::from_bytes_be(challenge);
        let m = rsa::hazmat::rsa_decrypt_and_check(&self.key, None::<&mut ForbiddenRng>, &c)
            .map_err(|e| KeyError::Crypto(e.to_string()))?;

        let plain = m.to_bytes_be();
        let mut low = [0u8; 32];
        let take = plain.len().min(32);
        low[32 - take..].copy_from_slice(&plain[plain.len() - take..]);

        let mut hasher = Md5::new();
        hasher.update(low);
        hasher.update(session_id);
        Ok(hasher.finalize().into())
    }
}
