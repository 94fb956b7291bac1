//! Zero-knowledge password proof (SRP-6a).
//!
//! Pure functions implementing the Secure Remote Password exchange over the
//! RFC 5054 2048-bit group with SHA-256 as the hash.
//!
//! # Protocol Flow
//!
//! ## Enrollment (once per identity, run by the credential repository)
//! 1. `hash_credentials(identity, secret)` → `CredentialHash { salt, verifier, key }`
//!
//! ## Login (per handshake attempt)
//! 1. Client: `client_ephemeral(crypt_rand())` → `(a, A)`, sends `A`
//! 2. Host: `server_ephemeral(verifier, crypt_rand())` → `(b, B)`, sends `salt`, `B`
//! 3. Both: `u = calculate_random_scramble(A, B)`
//! 4. Client: `K = client_compute_session_key(...)`, `M1 = client_create_session_hash(...)`
//! 5. Host: `K = server_compute_session_key(...)`, checks `M1`, replies `M2 = server_create_session_hash(...)`
//! 6. Client: checks `M2`
//!
//! # Security Properties
//!
//! - The shared secret never crosses the wire, only `A`, `B`, `salt` and the proofs
//! - Session keys are compared only through the proofs
//! - Proof comparison is constant-time
//! - Degenerate public values (`≡ 0 mod N`) are rejected

use crate::{Error, Result};
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};
use srp::groups::G_2048;
use srp::types::SrpGroup;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of the entropy returned by [`crypt_rand`].
pub const RANDOM_LEN: usize = 32;

/// Length of every hash output (SHA-256).
pub const HASH_LEN: usize = 32;

/// Length of a padded public value (`len(N)` for the 2048-bit group).
pub const PUBLIC_LEN: usize = 256;

/// Credential record derived once per identity by the repository.
///
/// `salt` and `verifier` are safe to transmit. `key` is the secret-derived
/// private exponent `x` and never leaves the host process.
#[derive(Clone)]
pub struct CredentialHash {
    /// Identity the record belongs to.
    pub identity: String,
    /// Random salt chosen when the record was created.
    pub salt: Vec<u8>,
    /// Padded verifier `v = g^x mod N`.
    pub verifier: Vec<u8>,
    /// Private exponent `x`, zeroed on drop.
    pub key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHash")
            .field("identity", &self.identity)
            .field("salt_len", &self.salt.len())
            .field("verifier_len", &self.verifier.len())
            .finish_non_exhaustive()
    }
}

/// Ephemeral key pair for one handshake attempt.
///
/// The private half is zeroed on drop; only the public half is transmitted.
pub struct Ephemeral {
    private: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl Ephemeral {
    /// Padded public value (`A` or `B`), [`PUBLIC_LEN`] bytes.
    pub fn public(&self) -> &[u8] {
        &self.public
    }

    /// Private exponent (`a` or `b`).
    pub fn private(&self) -> &[u8] {
        &self.private
    }
}

impl std::fmt::Debug for Ephemeral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ephemeral")
            .field("public_len", &self.public.len())
            .finish_non_exhaustive()
    }
}

fn group() -> &'static SrpGroup {
    &G_2048
}

/// Left-pad a group element to [`PUBLIC_LEN`] bytes.
fn pad(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= PUBLIC_LEN {
        return bytes;
    }
    let mut padded = vec![0u8; PUBLIC_LEN - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}

fn hash_parts(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Multiplier `k = H(N | PAD(g))`.
fn multiplier() -> BigUint {
    let g = group();
    BigUint::from_bytes_be(&hash_parts(&[&g.n.to_bytes_be(), &pad(&g.g)]))
}

/// Private exponent `x = H(salt | H(identity ":" secret))`.
fn private_key(salt: &[u8], identity: &str, secret: &[u8]) -> Zeroizing<Vec<u8>> {
    let inner = Zeroizing::new(hash_parts(&[identity.as_bytes(), b":", secret]));
    Zeroizing::new(hash_parts(&[salt, inner.as_slice()]).to_vec())
}

/// Parse a peer-supplied public value, rejecting wrong lengths and zero.
fn parse_public(bytes: &[u8]) -> Result<BigUint> {
    if bytes.len() != PUBLIC_LEN {
        return Err(Error::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            PUBLIC_LEN,
            bytes.len()
        )));
    }
    let value = BigUint::from_bytes_be(bytes) % &group().n;
    if value == BigUint::default() {
        return Err(Error::InvalidPublicKey("value is zero modulo N".into()));
    }
    Ok(value)
}

/// Cryptographically secure random bytes from the OS RNG.
pub fn crypt_rand() -> [u8; RANDOM_LEN] {
    let mut bytes = [0u8; RANDOM_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generic one-way hash (SHA-256).
pub fn compute_hash(data: &[u8]) -> [u8; HASH_LEN] {
    hash_parts(&[data])
}

/// Derive a credential record with a fresh random salt.
///
/// Repositories call this once per identity and cache the result.
pub fn hash_credentials(identity: &str, secret: &[u8]) -> CredentialHash {
    hash_credentials_with_salt(identity, secret, &crypt_rand())
}

/// Derive a credential record with a caller-chosen salt.
///
/// Deterministic for identical inputs.
pub fn hash_credentials_with_salt(identity: &str, secret: &[u8], salt: &[u8]) -> CredentialHash {
    let g = group();
    let key = private_key(salt, identity, secret);
    let verifier = g.g.modpow(&BigUint::from_bytes_be(&key), &g.n);

    CredentialHash {
        identity: identity.to_string(),
        salt: salt.to_vec(),
        verifier: pad(&verifier),
        key,
    }
}

/// Generate the client ephemeral `(a, A = g^a mod N)`.
///
/// # Errors
///
/// Returns `Error::InvalidLength` if `randomness` is not [`RANDOM_LEN`] bytes.
pub fn client_ephemeral(randomness: &[u8]) -> Result<Ephemeral> {
    check_randomness(randomness)?;
    let g = group();
    let mut private = Zeroizing::new(randomness.to_vec());

    loop {
        let public = g.g.modpow(&BigUint::from_bytes_be(&private), &g.n);
        if public != BigUint::default() {
            return Ok(Ephemeral {
                private,
                public: pad(&public),
            });
        }
        private = Zeroizing::new(crypt_rand().to_vec());
    }
}

/// Generate the host ephemeral `(b, B = (k·v + g^b) mod N)`.
///
/// # Errors
///
/// Returns `Error::InvalidLength` for bad randomness and
/// `Error::InvalidPublicKey` for a malformed verifier.
pub fn server_ephemeral(verifier: &[u8], randomness: &[u8]) -> Result<Ephemeral> {
    check_randomness(randomness)?;
    let g = group();
    let v = parse_public(verifier)?;
    let kv = (multiplier() * v) % &g.n;
    let mut private = Zeroizing::new(randomness.to_vec());

    loop {
        let public = (&kv + g.g.modpow(&BigUint::from_bytes_be(&private), &g.n)) % &g.n;
        if public != BigUint::default() {
            return Ok(Ephemeral {
                private,
                public: pad(&public),
            });
        }
        private = Zeroizing::new(crypt_rand().to_vec());
    }
}

fn check_randomness(randomness: &[u8]) -> Result<()> {
    if randomness.len() != RANDOM_LEN {
        return Err(Error::InvalidLength {
            expected: RANDOM_LEN,
            actual: randomness.len(),
        });
    }
    Ok(())
}

/// Scramble `u = H(PAD(A) | PAD(B))`.
///
/// # Errors
///
/// Rejects malformed public values and a zero scramble.
pub fn calculate_random_scramble(client_public: &[u8], server_public: &[u8]) -> Result<[u8; HASH_LEN]> {
    parse_public(client_public)?;
    parse_public(server_public)?;

    let u = hash_parts(&[client_public, server_public]);
    if u.iter().all(|b| *b == 0) {
        return Err(Error::ZeroScramble);
    }
    Ok(u)
}

/// Client session key `K = H(S)`, `S = (B − k·g^x)^(a + u·x) mod N`.
///
/// # Arguments
///
/// * `salt` - Salt received from the host
/// * `identity` / `secret` - Client credentials
/// * `ephemeral` - Client ephemeral `(a, A)`
/// * `server_public` - Host ephemeral `B`
/// * `scramble` - `u` from [`calculate_random_scramble`]
///
/// # Errors
///
/// Returns `Error::InvalidPublicKey` if `B` is malformed or degenerate.
pub fn client_compute_session_key(
    salt: &[u8],
    identity: &str,
    secret: &[u8],
    ephemeral: &Ephemeral,
    server_public: &[u8],
    scramble: &[u8],
) -> Result<Zeroizing<[u8; HASH_LEN]>> {
    let g = group();
    let b_pub = parse_public(server_public)?;
    let x = BigUint::from_bytes_be(&private_key(salt, identity, secret));
    let a = BigUint::from_bytes_be(ephemeral.private());
    let u = BigUint::from_bytes_be(scramble);

    let kgx = (multiplier() * g.g.modpow(&x, &g.n)) % &g.n;
    let base = (b_pub + &g.n - kgx) % &g.n;
    if base == BigUint::default() {
        return Err(Error::InvalidPublicKey("server value collapses to zero".into()));
    }

    let exponent = a + u * x;
    let premaster = Zeroizing::new(pad(&base.modpow(&exponent, &g.n)));
    Ok(Zeroizing::new(compute_hash(&premaster)))
}

/// Host session key `K = H(S)`, `S = (A · v^u)^b mod N`.
///
/// # Errors
///
/// Returns `Error::InvalidPublicKey` if `A` or the verifier is malformed.
pub fn server_compute_session_key(
    verifier: &[u8],
    ephemeral: &Ephemeral,
    client_public: &[u8],
    scramble: &[u8],
) -> Result<Zeroizing<[u8; HASH_LEN]>> {
    let g = group();
    let a_pub = parse_public(client_public)?;
    let v = parse_public(verifier)?;
    let b = BigUint::from_bytes_be(ephemeral.private());
    let u = BigUint::from_bytes_be(scramble);

    let base = (a_pub * v.modpow(&u, &g.n)) % &g.n;
    let premaster = Zeroizing::new(pad(&base.modpow(&b, &g.n)));
    Ok(Zeroizing::new(compute_hash(&premaster)))
}

/// Client proof `M1 = H(H(N) xor H(g) | H(I) | s | A | B | K)`.
pub fn client_create_session_hash(
    identity: &str,
    salt: &[u8],
    client_public: &[u8],
    server_public: &[u8],
    session_key: &[u8],
) -> [u8; HASH_LEN] {
    let g = group();
    let hn = compute_hash(&g.n.to_bytes_be());
    let hg = compute_hash(&g.g.to_bytes_be());
    let mut group_hash = [0u8; HASH_LEN];
    for (out, (n, g)) in group_hash.iter_mut().zip(hn.iter().zip(hg.iter())) {
        *out = n ^ g;
    }

    hash_parts(&[
        &group_hash,
        &compute_hash(identity.as_bytes()),
        salt,
        client_public,
        server_public,
        session_key,
    ])
}

/// Host proof `M2 = H(A | M1 | K)`.
pub fn server_create_session_hash(
    client_public: &[u8],
    client_proof: &[u8],
    session_key: &[u8],
) -> [u8; HASH_LEN] {
    hash_parts(&[client_public, client_proof, session_key])
}

/// Constant-time proof comparison.
pub fn verify_proof(expected: &[u8], received: &[u8]) -> bool {
    expected.len() == received.len() && bool::from(expected.ct_eq(received))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exchange {
        client_key: Zeroizing<[u8; HASH_LEN]>,
        server_key: Zeroizing<[u8; HASH_LEN]>,
        m1: [u8; HASH_LEN],
        expected_m1: [u8; HASH_LEN],
    }

    fn run_exchange(record: &CredentialHash, secret: &[u8]) -> Exchange {
        let client = client_ephemeral(&crypt_rand()).expect("client ephemeral");
        let server = server_ephemeral(&record.verifier, &crypt_rand()).expect("server ephemeral");
        let u = calculate_random_scramble(client.public(), server.public()).expect("scramble");

        let client_key = client_compute_session_key(
            &record.salt,
            &record.identity,
            secret,
            &client,
            server.public(),
            &u,
        )
        .expect("client key");
        let server_key =
            server_compute_session_key(&record.verifier, &server, client.public(), &u).expect("server key");

        let m1 = client_create_session_hash(
            &record.identity,
            &record.salt,
            client.public(),
            server.public(),
            client_key.as_slice(),
        );
        let expected_m1 = client_create_session_hash(
            &record.identity,
            &record.salt,
            client.public(),
            server.public(),
            server_key.as_slice(),
        );

        Exchange {
            client_key,
            server_key,
            m1,
            expected_m1,
        }
    }

    #[test]
    fn test_matching_credentials_agree_on_key() {
        let record = hash_credentials("alice", b"s3cret");
        let exchange = run_exchange(&record, b"s3cret");

        assert_eq!(*exchange.client_key, *exchange.server_key);
        assert!(verify_proof(&exchange.expected_m1, &exchange.m1));
    }

    #[test]
    fn test_wrong_secret_fails_proof() {
        let record = hash_credentials("alice", b"s3cret");
        let exchange = run_exchange(&record, b"wrong");

        assert_ne!(*exchange.client_key, *exchange.server_key);
        assert!(!verify_proof(&exchange.expected_m1, &exchange.m1));
    }

    #[test]
    fn test_server_proof_is_bound_to_client_proof() {
        let key = [7u8; HASH_LEN];
        let a = vec![1u8; PUBLIC_LEN];
        let m2 = server_create_session_hash(&a, &[2u8; HASH_LEN], &key);
        let other = server_create_session_hash(&a, &[3u8; HASH_LEN], &key);
        assert_ne!(m2, other);
    }

    #[test]
    fn test_scramble_is_symmetric() {
        let record = hash_credentials("bob", b"pw");
        let client = client_ephemeral(&crypt_rand()).unwrap();
        let server = server_ephemeral(&record.verifier, &crypt_rand()).unwrap();

        let u1 = calculate_random_scramble(client.public(), server.public()).unwrap();
        let u2 = calculate_random_scramble(client.public(), server.public()).unwrap();
        assert_eq!(u1, u2);
    }

    #[test]
    fn test_public_values_are_padded() {
        let record = hash_credentials("carol", b"pw");
        let client = client_ephemeral(&crypt_rand()).unwrap();
        let server = server_ephemeral(&record.verifier, &crypt_rand()).unwrap();

        assert_eq!(client.public().len(), PUBLIC_LEN);
        assert_eq!(server.public().len(), PUBLIC_LEN);
        assert_eq!(record.verifier.len(), PUBLIC_LEN);
    }

    #[test]
    fn test_zero_public_value_rejected() {
        let zero = vec![0u8; PUBLIC_LEN];
        let client = client_ephemeral(&crypt_rand()).unwrap();

        assert!(matches!(
            calculate_random_scramble(client.public(), &zero),
            Err(Error::InvalidPublicKey(_))
        ));

        let n = pad(&group().n);
        assert!(matches!(
            calculate_random_scramble(&n, client.public()),
            Err(Error::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_wrong_length_public_value_rejected() {
        let client = client_ephemeral(&crypt_rand()).unwrap();
        let result = calculate_random_scramble(client.public(), &[1u8; 32]);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));
    }

    #[test]
    fn test_short_randomness_rejected() {
        let result = client_ephemeral(&[1u8; 8]);
        assert!(matches!(
            result,
            Err(Error::InvalidLength {
                expected: RANDOM_LEN,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_hash_credentials_deterministic_for_salt() {
        let salt = hex::decode("beb25379d1a8581eb5a727673a2441ee").unwrap();
        let one = hash_credentials_with_salt("alice", b"password123", &salt);
        let two = hash_credentials_with_salt("alice", b"password123", &salt);

        assert_eq!(one.verifier, two.verifier);
        assert_eq!(*one.key, *two.key);
    }

    #[test]
    fn test_hash_credentials_uses_fresh_salt() {
        let one = hash_credentials("alice", b"password123");
        let two = hash_credentials("alice", b"password123");

        assert_ne!(one.salt, two.salt);
        assert_ne!(one.verifier, two.verifier);
    }

    #[test]
    fn test_verify_proof_length_mismatch() {
        assert!(!verify_proof(&[1, 2, 3], &[1, 2]));
        assert!(verify_proof(&[1, 2, 3], &[1, 2, 3]));
    }

    #[test]
    fn test_debug_hides_key() {
        let record = hash_credentials("alice", b"s3cret");
        let rendered = format!("{record:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("key"));
    }
}
