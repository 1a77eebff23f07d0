//! SSH-2 keys: decoding, validation and signing

use bytes::{Bytes, BytesMut};
use rsa::pkcs1v15::SigningKey;
use rsa::traits::PublicKeyParts;
use rsa::BigUint;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use signature::{SignatureEncoding, Signer};
use ssh_encoding::{Decode, Encode};
use ssh_key::private::{KeypairData, RsaKeypair};
use ssh_key::{Algorithm, EcdsaCurve, HashAlg, Mpint, PrivateKey, PublicKey};

use kh_protocol::{SignFlags, WireReader, WireWrite};

use super::KeyError;

/// Flags each algorithm accepts on a sign request
pub fn supported_flags(key: &PrivateKey) -> SignFlags {
    match key.algorithm() {
        Algorithm::Rsa { .. } => SignFlags::RSA_SHA2_256 | SignFlags::RSA_SHA2_512,
        _ => SignFlags::NONE,
    }
}

/// Whether the agent can sign with keys of this algorithm
pub fn is_supported(algorithm: &Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::Ed25519
            | Algorithm::Rsa { hash: None }
            | Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256
            }
    )
}

/// Whether an algorithm name from the wire is one the agent can sign with
pub fn is_supported_algorithm(name: &[u8]) -> bool {
    std::str::from_utf8(name)
        .ok()
        .and_then(|name| Algorithm::new(name).ok())
        .is_some_and(|alg| is_supported(&alg))
}

/// Public blob of a private key
pub fn public_blob(key: &PrivateKey) -> Result<Bytes, KeyError> {
    key.public_key()
        .to_bytes()
        .map(Bytes::from)
        .map_err(|e| KeyError::SetupFailed(e.to_string()))
}

/// SHA-256 fingerprint of a public blob, for logs and the client tool
pub fn fingerprint(blob: &[u8]) -> String {
    match PublicKey::from_bytes(blob) {
        Ok(key) => key.fingerprint(HashAlg::Sha256).to_string(),
        Err(_) => format!("unparseable key blob ({} bytes)", blob.len()),
    }
}

/// Decode the body of `SSH2_AGENTC_ADD_IDENTITY`:
/// `string algorithm, algorithm-specific key fields, string comment`
pub fn decode_agent(reader: &mut WireReader) -> Result<PrivateKey, KeyError> {
    let mut probe = reader.clone();
    let alg = probe.get_string("algorithm")?;
    if !is_supported_algorithm(&alg) {
        return Err(KeyError::AlgorithmUnknown);
    }

    let mut fields = reader.peek();
    let before = fields.len();
    let keypair = KeypairData::decode(&mut fields).map_err(|e| KeyError::SetupFailed(e.to_string()))?;
    let consumed = before - fields.len();
    reader.advance(consumed, "key fields")?;

    let comment = reader.get_text_lossy("comment")?;
    let key = PrivateKey::new(keypair, comment).map_err(|e| KeyError::SetupFailed(e.to_string()))?;
    if let KeypairData::Rsa(rsa) = key.key_data() {
        to_rsa(rsa)?;
    }
    Ok(key)
}

/// Encode a private key the way `SSH2_AGENTC_ADD_IDENTITY` carries it
pub fn encode_agent(key: &PrivateKey, dst: &mut BytesMut) -> Result<(), KeyError> {
    let mut fields = Vec::new();
    key.key_data()
        .encode(&mut fields)
        .map_err(|e| KeyError::SetupFailed(e.to_string()))?;
    dst.extend_from_slice(&fields);
    dst.put_string(key.comment().as_bytes());
    Ok(())
}

/// Build an `rsa` key from both primes, with no minimum modulus size
fn to_rsa(keypair: &RsaKeypair) -> Result<rsa::RsaPrivateKey, KeyError> {
    let key = rsa::RsaPrivateKey::from_components(
        to_biguint(&keypair.public.n)?,
        to_biguint(&keypair.public.e)?,
        to_biguint(&keypair.private.d)?,
        vec![
            to_biguint(&keypair.private.p)?,
            to_biguint(&keypair.private.q)?,
        ],
    )
    .map_err(|_| KeyError::Invalid)?;
    key.validate().map_err(|_| KeyError::Invalid)?;
    Ok(key)
}

fn to_biguint(mpint: &Mpint) -> Result<BigUint, KeyError> {
    mpint
        .as_positive_bytes()
        .map(BigUint::from_bytes_be)
        .ok_or(KeyError::Invalid)
}

/// RSA signature variant selected by the request flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RsaHash {
    Sha1,
    Sha256,
    Sha512,
}

impl RsaHash {
    fn for_flags(flags: SignFlags) -> Self {
        if flags.contains(SignFlags::RSA_SHA2_256) {
            RsaHash::Sha256
        } else if flags.contains(SignFlags::RSA_SHA2_512) {
            RsaHash::Sha512
        } else {
            RsaHash::Sha1
        }
    }

    fn protocol_name(&self) -> &'static str {
        match self {
            RsaHash::Sha1 => "ssh-rsa",
            RsaHash::Sha256 => "rsa-sha2-256",
            RsaHash::Sha512 => "rsa-sha2-512",
        }
    }

    /// Smallest modulus, in bytes, that can hold a PKCS#1 v1.5 signature
    /// with this digest: DigestInfo prefix, digest, and 11 bytes of padding
    fn min_modulus_bytes(&self) -> usize {
        let (prefix, digest) = match self {
            RsaHash::Sha1 => (15, <Sha1 as Digest>::output_size()),
            RsaHash::Sha256 => (19, <Sha256 as Digest>::output_size()),
            RsaHash::Sha512 => (19, <Sha512 as Digest>::output_size()),
        };
        prefix + digest + 11
    }
}

/// Reason a key cannot produce the requested signature, if any
pub fn invalid_reason(key: &PrivateKey, flags: SignFlags) -> Option<String> {
    let KeypairData::Rsa(keypair) = key.key_data() else {
        return None;
    };
    let hash = RsaHash::for_flags(flags);
    let rsa_key = match to_rsa(keypair) {
        Ok(k) => k,
        Err(_) => return Some("RSA key components are inconsistent".to_string()),
    };
    let bits = rsa_key.n().bits();
    if rsa_key.size() < hash.min_modulus_bytes() {
        return Some(format!(
            "{}-bit RSA key is too short to generate {} signatures",
            bits,
            hash.protocol_name()
        ));
    }
    None
}

/// Sign `data`, returning the signature blob (`string algorithm, string signature`)
pub fn sign(key: &PrivateKey, data: &[u8], flags: SignFlags) -> Result<Bytes, KeyError> {
    if let KeypairData::Rsa(keypair) = key.key_data() {
        let rsa_key = to_rsa(keypair)?;
        let hash = RsaHash::for_flags(flags);
        let raw = match hash {
            RsaHash::Sha1 => sign_pkcs1(SigningKey::<Sha1>::new(rsa_key), data)?,
            RsaHash::Sha256 => sign_pkcs1(SigningKey::<Sha256>::new(rsa_key), data)?,
            RsaHash::Sha512 => sign_pkcs1(SigningKey::<Sha512>::new(rsa_key), data)?,
        };
        let mut blob = BytesMut::new();
        blob.put_string(hash.protocol_name().as_bytes());
        blob.put_string(&raw);
        return Ok(blob.freeze());
    }

    let signature: ssh_key::Signature = key
        .try_sign(data)
        .map_err(|e| KeyError::Crypto(e.to_string()))?;
    let mut encoded = Vec::new();
    signature
        .encode(&mut encoded)
        .map(|()| Bytes::from(encoded))
        .map_err(|e| KeyError::Crypto(e.to_string()))
}

fn sign_pkcs1<S>(signer: S, data: &[u8]) -> Result<Vec<u8>, KeyError>
where
    S: Signer<rsa::pkcs1v15::Signature>,
{
    signer
        .try_sign(data)
        .map(|sig| sig.to_vec())
        .map_err(|e| KeyError::Crypto(e.to_string()))
}
