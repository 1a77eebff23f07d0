//! PuTTY private key files (`.ppk`, versions 2 and 3)
//!
//! A PPK file keeps the algorithm, comment and public blob in the clear,
//! so a key held only in encrypted form can still be listed by name. The
//! private blob is optionally AES-256-CBC encrypted and always covered by
//! an HMAC over every field, which is also how a wrong passphrase shows up.
//!
//! ```text
//! PuTTY-User-Key-File-3: ssh-ed25519
//! Encryption: aes256-cbc
//! Comment: work@laptop
//! Public-Lines: 2
//! ...
//! Key-Derivation: Argon2id        (version 3, encrypted only)
//! Argon2-Memory: 8192
//! Argon2-Passes: 13
//! Argon2-Parallelism: 1
//! Argon2-Salt: <hex>
//! Private-Lines: 1
//! ...
//! Private-MAC: <hex>
//! ```

use std::fmt;

use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use ssh_encoding::Encode;
use ssh_key::private::{EcdsaKeypair, KeypairData};
use ssh_key::{Mpint, PrivateKey};
use zeroize::Zeroizing;

use kh_protocol::{WireReader, WireWrite};

use super::{ssh2, KeyError};

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

const MAGIC: &str = "PuTTY-User-Key-File-";
const BLOCK_SIZE: usize = 16;
const LINE_WIDTH: usize = 64;
const SALT_LEN: usize = 16;
const V2_MAC_KEY_PREFIX: &[u8] = b"putty-private-key-file-mac-key";

/// Width of a NIST P-256 private scalar
const P256_SCALAR_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormatVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encryption {
    None,
    Aes256Cbc,
}

impl Encryption {
    fn name(&self) -> &'static str {
        match self {
            Encryption::None => "none",
            Encryption::Aes256Cbc => "aes256-cbc",
        }
    }
}

/// Argon2 cost parameters for a version 3 file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub flavour: argon2::Algorithm,
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub passes: u32,
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            flavour: argon2::Algorithm::Argon2id,
            memory_kib: 8192,
            passes: 13,
            parallelism: 1,
        }
    }
}

impl Argon2Params {
    fn flavour_name(&self) -> &'static str {
        match self.flavour {
            argon2::Algorithm::Argon2d => "Argon2d",
            argon2::Algorithm::Argon2i => "Argon2i",
            argon2::Algorithm::Argon2id => "Argon2id",
        }
    }
}

#[derive(Debug, Clone)]
struct Kdf {
    params: Argon2Params,
    salt: Vec<u8>,
}

/// Cipher key, IV and MAC key derived from a passphrase
struct DerivedKeys {
    cipher_key: Zeroizing<Vec<u8>>,
    iv: [u8; BLOCK_SIZE],
    mac_key: Zeroizing<Vec<u8>>,
}

/// A parsed PPK file
///
/// Nothing is decrypted or checked against the MAC until [`PpkFile::decrypt`].
#[derive(Clone)]
pub struct PpkFile {
    contents: Bytes,
    version: FormatVersion,
    algorithm: String,
    encryption: Encryption,
    comment: String,
    public_blob: Bytes,
    kdf: Option<Kdf>,
    private_blob: Zeroizing<Vec<u8>>,
    mac: Vec<u8>,
}

impl fmt::Debug for PpkFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PpkFile")
            .field("version", &self.version)
            .field("algorithm", &self.algorithm)
            .field("encryption", &self.encryption)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

fn format_error(message: impl Into<String>) -> KeyError {
    KeyError::KeyFile(message.into())
}

/// Whether `contents` looks like a PPK file
pub fn is_ppk(contents: &[u8]) -> bool {
    contents.starts_with(MAGIC.as_bytes())
}

/// Sequential reader over the `Key: value` lines of a PPK file
struct Lines<'a> {
    inner: std::str::Lines<'a>,
}

impl<'a> Lines<'a> {
    fn next_line(&mut self, what: &str) -> Result<&'a str, KeyError> {
        self.inner
            .next()
            .ok_or_else(|| format_error(format!("file ends before {}", what)))
    }

    fn header(&mut self, key: &str) -> Result<&'a str, KeyError> {
        let line = self.next_line(key)?;
        match line.split_once(": ") {
            Some((found, value)) if found == key => Ok(value),
            _ => Err(format_error(format!("expected '{}' header", key))),
        }
    }

    fn number(&mut self, key: &str) -> Result<u32, KeyError> {
        self.header(key)?
            .parse()
            .map_err(|_| format_error(format!("bad number in '{}' header", key)))
    }

    fn base64_block(&mut self, key: &str) -> Result<Vec<u8>, KeyError> {
        let count = self.number(key)?;
        let mut encoded = String::new();
        for _ in 0..count {
            encoded.push_str(self.next_line(key)?.trim());
        }
        STANDARD
            .decode(encoded)
            .map_err(|e| format_error(format!("bad base64 after '{}': {}", key, e)))
    }
}

impl PpkFile {
    /// Parse the headers and blobs of a PPK file
    pub fn parse(contents: Bytes) -> Result<Self, KeyError> {
        let text = std::str::from_utf8(&contents)
            .map_err(|_| format_error("PPK file is not valid UTF-8"))?;
        let mut lines = Lines {
            inner: text.lines(),
        };

        let first = lines.next_line("key type")?;
        let (tag, algorithm) = first
            .strip_prefix(MAGIC)
            .and_then(|rest| rest.split_once(": "))
            .ok_or_else(|| format_error("not a PuTTY key file"))?;
        let version = match tag {
            "3" => FormatVersion::V3,
            "2" => FormatVersion::V2,
            "1" => return Err(format_error("PuTTY key format too old")),
            _ => return Err(format_error("PuTTY key format too new")),
        };
        let algorithm = algorithm.to_string();

        let encryption = match lines.header("Encryption")? {
            "none" => Encryption::None,
            "aes256-cbc" => Encryption::Aes256Cbc,
            other => return Err(format_error(format!("unknown encryption type '{}'", other))),
        };
        let comment = lines.header("Comment")?.to_string();
        let public_blob = Bytes::from(lines.base64_block("Public-Lines")?);

        let kdf = if version == FormatVersion::V3 && encryption != Encryption::None {
            Some(Self::parse_kdf(&mut lines)?)
        } else {
            None
        };

        let private_blob = Zeroizing::new(lines.base64_block("Private-Lines")?);
        let mac = hex::decode(lines.header("Private-MAC")?)
            .map_err(|_| format_error("bad hex in 'Private-MAC' header"))?;

        Ok(Self {
            contents,
            version,
            algorithm,
            encryption,
            comment,
            public_blob,
            kdf,
            private_blob,
            mac,
        })
    }

    fn parse_kdf(lines: &mut Lines<'_>) -> Result<Kdf, KeyError> {
        let flavour = match lines.header("Key-Derivation")? {
            "Argon2d" => argon2::Algorithm::Argon2d,
            "Argon2i" => argon2::Algorithm::Argon2i,
            "Argon2id" => argon2::Algorithm::Argon2id,
            other => return Err(format_error(format!("unknown key derivation '{}'", other))),
        };
        let params = Argon2Params {
            flavour,
            memory_kib: lines.number("Argon2-Memory")?,
            passes: lines.number("Argon2-Passes")?,
            parallelism: lines.number("Argon2-Parallelism")?,
        };
        let salt = hex::decode(lines.header("Argon2-Salt")?)
            .map_err(|_| format_error("bad hex in 'Argon2-Salt' header"))?;
        Ok(Kdf { params, salt })
    }

    /// Raw file contents
    pub fn contents(&self) -> &Bytes {
        &self.contents
    }

    /// Algorithm name from the first line
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn public_blob(&self) -> &Bytes {
        &self.public_blob
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption != Encryption::None
    }

    fn derive_keys(&self, passphrase: &[u8]) -> Result<DerivedKeys, KeyError> {
        match self.version {
            FormatVersion::V3 => match &self.kdf {
                Some(kdf) => argon2_keys(&kdf.params, &kdf.salt, passphrase),
                None => Ok(DerivedKeys {
                    cipher_key: Zeroizing::new(Vec::new()),
                    iv: [0; BLOCK_SIZE],
                    mac_key: Zeroizing::new(Vec::new()),
                }),
            },
            FormatVersion::V2 => {
                let passphrase = if self.is_encrypted() { passphrase } else { b"" };
                Ok(v2_keys(passphrase))
            }
        }
    }

    /// Decrypt the private blob and check the MAC
    ///
    /// The passphrase is ignored for unencrypted files.
    pub fn decrypt(&self, passphrase: &[u8]) -> Result<PrivateKey, KeyError> {
        let keys = self.derive_keys(passphrase)?;

        let mut private = self.private_blob.clone();
        if self.is_encrypted() {
            if private.len() % BLOCK_SIZE != 0 {
                return Err(format_error("private blob is not a whole number of cipher blocks"));
            }
            Aes256CbcDec::new_from_slices(&keys.cipher_key, &keys.iv)
                .map_err(|e| KeyError::Crypto(e.to_string()))?
                .decrypt_padded_mut::<NoPadding>(&mut private)
                .map_err(|e| KeyError::Crypto(e.to_string()))?;
        }

        let expected = self.compute_mac(&keys.mac_key, &private)?;
        if expected != self.mac {
            return Err(if self.is_encrypted() {
                KeyError::WrongPassphrase
            } else {
                format_error("MAC check failed")
            });
        }

        let key = self.to_private_key(&private)?;
        if ssh2::public_blob(&key)? != self.public_blob {
            return Err(format_error("public and private halves of the file do not match"));
        }
        Ok(key)
    }

    fn compute_mac(&self, mac_key: &[u8], private: &[u8]) -> Result<Vec<u8>, KeyError> {
        let data = mac_input(
            &self.algorithm,
            self.encryption,
            &self.comment,
            &self.public_blob,
            private,
        );
        match self.version {
            FormatVersion::V3 => hmac_sha256(mac_key, &data),
            FormatVersion::V2 => {
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(mac_key)
                    .map_err(|e| KeyError::Crypto(e.to_string()))?;
                mac.update(&data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Rebuild the key as an `SSH2_AGENTC_ADD_IDENTITY` body and decode that
    fn to_private_key(&self, private: &[u8]) -> Result<PrivateKey, KeyError> {
        let mut public = WireReader::new(self.public_blob.clone());
        let mut secret = WireReader::new(Bytes::copy_from_slice(private));

        let algorithm = public.get_utf8("public key algorithm")?;
        if algorithm != self.algorithm {
            return Err(format_error("public blob does not match the key type"));
        }

        let mut body = BytesMut::new();
        body.put_string(algorithm.as_bytes());
        match algorithm.as_str() {
            "ssh-rsa" => {
                let e = public.get_string("rsa e")?;
                let n = public.get_string("rsa n")?;
                let d = secret.get_string("rsa d")?;
                let p = secret.get_string("rsa p")?;
                let q = secret.get_string("rsa q")?;
                let iqmp = secret.get_string("rsa iqmp")?;
                for field in [&n, &e, &d, &iqmp, &p, &q] {
                    body.put_string(field);
                }
            }
            "ssh-ed25519" => {
                let public_key = public.get_string("ed25519 public key")?;
                let seed = secret.get_string("ed25519 private key")?;
                let mut pair = Zeroizing::new(seed.to_vec());
                pair.extend_from_slice(&public_key);
                body.put_string(&public_key);
                body.put_string(&pair);
            }
            "ecdsa-sha2-nistp256" => {
                let curve = public.get_string("ecdsa curve")?;
                let point = public.get_string("ecdsa point")?;
                let scalar = secret.get_string("ecdsa private key")?;
                body.put_string(&curve);
                body.put_string(&point);
                body.put_string(&p256_scalar(&scalar)?);
            }
            _ => return Err(KeyError::AlgorithmUnknown),
        }
        body.put_string(self.comment.as_bytes());

        let mut reader = WireReader::new(body.freeze());
        ssh2::decode_agent(&mut reader)
    }
}

/// An mpint scalar widened to the fixed-size form the agent wire expects
fn p256_scalar(mpint: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let digits = match mpint.iter().position(|&b| b != 0) {
        Some(start) => &mpint[start..],
        None => &[][..],
    };
    if digits.len() > P256_SCALAR_LEN {
        return Err(KeyError::Invalid);
    }
    let mut fixed = Zeroizing::new(vec![0u8; P256_SCALAR_LEN + 1]);
    fixed[P256_SCALAR_LEN + 1 - digits.len()..].copy_from_slice(digits);
    if fixed[1] < 0x80 {
        fixed.remove(0);
    }
    Ok(fixed)
}

fn mac_input(
    algorithm: &str,
    encryption: Encryption,
    comment: &str,
    public_blob: &[u8],
    private: &[u8],
) -> Zeroizing<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_string(algorithm.as_bytes());
    buf.put_string(encryption.name().as_bytes());
    buf.put_string(comment.as_bytes());
    buf.put_string(public_blob);
    buf.put_string(private);
    let data = Zeroizing::new(buf.to_vec());
    zeroize::Zeroize::zeroize(&mut buf[..]);
    data
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, KeyError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| KeyError::Crypto(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Version 3: one Argon2 output split into cipher key, IV and MAC key
fn argon2_keys(params: &Argon2Params, salt: &[u8], passphrase: &[u8]) -> Result<DerivedKeys, KeyError> {
    const CIPHER_KEY_LEN: usize = 32;
    const MAC_KEY_LEN: usize = 32;
    let output_len = CIPHER_KEY_LEN + BLOCK_SIZE + MAC_KEY_LEN;

    let argon_params = argon2::Params::new(
        params.memory_kib,
        params.passes,
        params.parallelism,
        Some(output_len),
    )
    .map_err(|e| format_error(format!("argon2 params: {e}")))?;
    let argon = argon2::Argon2::new(params.flavour, argon2::Version::V0x13, argon_params);

    let mut output = Zeroizing::new(vec![0u8; output_len]);
    argon
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| KeyError::Crypto(format!("argon2: {e}")))?;

    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(&output[CIPHER_KEY_LEN..CIPHER_KEY_LEN + BLOCK_SIZE]);
    Ok(DerivedKeys {
        cipher_key: Zeroizing::new(output[..CIPHER_KEY_LEN].to_vec()),
        iv,
        mac_key: Zeroizing::new(output[CIPHER_KEY_LEN + BLOCK_SIZE..].to_vec()),
    })
}

/// Version 2: SHA-1 based cipher key, zero IV, SHA-1 derived MAC key
fn v2_keys(passphrase: &[u8]) -> DerivedKeys {
    let mut cipher_key = Zeroizing::new(Vec::with_capacity(40));
    for counter in 0u32..2 {
        let mut hasher = Sha1::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(passphrase);
        cipher_key.extend_from_slice(&hasher.finalize());
    }
    cipher_key.truncate(32);

    let mut hasher = Sha1::new();
    hasher.update(V2_MAC_KEY_PREFIX);
    hasher.update(passphrase);
    DerivedKeys {
        cipher_key,
        iv: [0; BLOCK_SIZE],
        mac_key: Zeroizing::new(hasher.finalize().to_vec()),
    }
}

fn encode_mpint(mpint: &Mpint, dst: &mut Vec<u8>) -> Result<(), KeyError> {
    mpint
        .encode(dst)
        .map_err(|e| KeyError::SetupFailed(e.to_string()))
}

/// Private blob in PPK field order
fn private_blob(key: &PrivateKey) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let mut blob = Zeroizing::new(Vec::new());
    match key.key_data() {
        KeypairData::Rsa(keypair) => {
            for mpint in [
                &keypair.private.d,
                &keypair.private.p,
                &keypair.private.q,
                &keypair.private.iqmp,
            ] {
                encode_mpint(mpint, &mut blob)?;
            }
        }
        KeypairData::Ed25519(keypair) => {
            let seed = Zeroizing::new(keypair.private.to_bytes());
            let mut buf = BytesMut::new();
            buf.put_string(&seed[..]);
            blob.extend_from_slice(&buf);
            zeroize::Zeroize::zeroize(&mut buf[..]);
        }
        KeypairData::Ecdsa(keypair @ EcdsaKeypair::NistP256 { .. }) => {
            let scalar = Mpint::from_positive_bytes(keypair.private_key_bytes())
                .map_err(|e| KeyError::SetupFailed(e.to_string()))?;
            encode_mpint(&scalar, &mut blob)?;
        }
        _ => return Err(KeyError::AlgorithmUnknown),
    }
    Ok(blob)
}

fn push_base64_lines(out: &mut String, header: &str, data: &[u8]) {
    let encoded = STANDARD.encode(data);
    let lines: Vec<&str> = encoded
        .as_bytes()
        .chunks(LINE_WIDTH)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();
    out.push_str(&format!("{}: {}\n", header, lines.len()));
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
}

/// Write `key` as a version 3 PPK file, encrypted if a passphrase is given
///
/// Randomness is only drawn for the salt and the padding of encrypted files.
pub fn encode(
    key: &PrivateKey,
    passphrase: Option<&[u8]>,
    params: &Argon2Params,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<String, KeyError> {
    let algorithm = key.algorithm().as_str().to_string();
    let public_blob = ssh2::public_blob(key)?;
    let mut private = private_blob(key)?;
    let comment = key.comment();

    let (encryption, keys, salt) = match passphrase {
        Some(passphrase) => {
            let padding = (BLOCK_SIZE - private.len() % BLOCK_SIZE) % BLOCK_SIZE;
            let mut pad = vec![0u8; padding];
            rng.fill_bytes(&mut pad);
            private.extend_from_slice(&pad);

            let mut salt = vec![0u8; SALT_LEN];
            rng.fill_bytes(&mut salt);
            let keys = argon2_keys(params, &salt, passphrase)?;
            (Encryption::Aes256Cbc, Some(keys), salt)
        }
        None => (Encryption::None, None, Vec::new()),
    };

    let mac_key: &[u8] = match &keys {
        Some(keys) => keys.mac_key.as_slice(),
        None => &[],
    };
    let mac = hmac_sha256(
        mac_key,
        &mac_input(&algorithm, encryption, comment, &public_blob, &private),
    )?;

    if let Some(keys) = &keys {
        let len = private.len();
        Aes256CbcEnc::new_from_slices(&keys.cipher_key, &keys.iv)
            .map_err(|e| KeyError::Crypto(e.to_string()))?
            .encrypt_padded_mut::<NoPadding>(&mut private, len)
            .map_err(|e| KeyError::Crypto(e.to_string()))?;
    }

    let mut out = String::new();
    out.push_str(&format!("{}3: {}\n", MAGIC, algorithm));
    out.push_str(&format!("Encryption: {}\n", encryption.name()));
    out.push_str(&format!("Comment: {}\n", comment));
    push_base64_lines(&mut out, "Public-Lines", &public_blob);
    if keys.is_some() {
        out.push_str(&format!("Key-Derivation: {}\n", params.flavour_name()));
        out.push_str(&format!("Argon2-Memory: {}\n", params.memory_kib));
        out.push_str(&format!("Argon2-Passes: {}\n", params.passes));
        out.push_str(&format!("Argon2-Parallelism: {}\n", params.parallelism));
        out.push_str(&format!("Argon2-Salt: {}\n", hex::encode(&salt)));
    }
    push_base64_lines(&mut out, "Private-Lines", &private);
    out.push_str(&format!("Private-MAC: {}\n", hex::encode(mac)));
    Ok(out)
}
