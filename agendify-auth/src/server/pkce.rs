//! PKCE (RFC 7636) verifier/challenge pair and the CSRF `state` nonce.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

pub const CHALLENGE_METHOD: &str = "S256";

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let random_bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&random_bytes)
}

/// 32 random bytes, base64url without padding (43 characters).
pub fn generate_verifier() -> String {
    random_token(VERIFIER_BYTES)
}

/// SHA-256 of the verifier, base64url without padding.
pub fn generate_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn generate_state() -> String {
    random_token(STATE_BYTES)
}

/// Compares two tokens through their digests so the comparison time does not
/// depend on where the inputs first differ.
pub(crate) fn tokens_match(expected: &str, presented: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(presented.as_bytes())
}
