//! Usage: PKCE verifier/challenge generation and the Google authorize URL.

use crate::auth::endpoints;
use crate::infra::settings::{MAX_PKCE_VERIFIER_LENGTH, MIN_PKCE_VERIFIER_LENGTH};
use crate::shared::error::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// RFC 7636 unreserved characters.
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
pub const CODE_CHALLENGE_METHOD: &str = "S256";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate(length: usize) -> AppResult<Self> {
        let verifier = generate_verifier(length)?;
        let challenge = derive_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}

pub fn generate_verifier(length: usize) -> AppResult<String> {
    if !(MIN_PKCE_VERIFIER_LENGTH..=MAX_PKCE_VERIFIER_LENGTH).contains(&length) {
        return Err(AppError::challenge(format!(
            "verifier length must be within {MIN_PKCE_VERIFIER_LENGTH}..={MAX_PKCE_VERIFIER_LENGTH}, got {length}"
        )));
    }

    let mut rng = rand::thread_rng();
    let verifier = (0..length)
        .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
        .collect();
    Ok(verifier)
}

pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// `{base}/auth/google/mobile?redirect_uri=..&code_challenge=..&code_challenge_method=S256`
pub fn google_authorize_url(
    api_base_url: &str,
    redirect_uri: &str,
    challenge: &str,
) -> AppResult<String> {
    let mut url = endpoints::join(api_base_url, endpoints::GOOGLE_AUTHORIZE)?;
    url.query_pairs_mut()
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
    Ok(url.to_string())
}
