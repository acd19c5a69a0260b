use super::error::TokenError;
use super::jwks::Jwks;
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Issuer prefix of ID tokens minted by the secure-token service.
pub const ID_TOKEN_ISSUER_PREFIX: &str = "https://securetoken.google.com/";
/// Issuer prefix of session cookies, matching the provider's own session-cookie format.
pub const SESSION_COOKIE_ISSUER_PREFIX: &str = "https://session.firebase.google.com/";

const MAX_SUBJECT_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl TokenHeader {
    fn rs256(kid: Option<&str>) -> Self {
        Self {
            alg: "RS256".to_string(),
            typ: Some("JWT".to_string()),
            kid: kid.map(ToString::to_string),
        }
    }
}

/// Claims of an identity-provider ID token that the endpoint relies on.
///
/// Provider-specific extras (`firebase`, `email_verified`, ...) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Claims carried by a minted session cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCookieClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub auth_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SessionCookieClaims {
    /// Derive session claims from verified ID token claims.
    ///
    /// `auth_time` falls back to the token's `iat` when the provider omitted it.
    #[must_use]
    pub fn from_id_token(
        project_id: &str,
        id_token: &IdTokenClaims,
        now_unix_seconds: i64,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            iss: format!("{SESSION_COOKIE_ISSUER_PREFIX}{project_id}"),
            aud: project_id.to_string(),
            sub: id_token.sub.clone(),
            iat: now_unix_seconds,
            exp: now_unix_seconds.saturating_add(ttl_seconds),
            auth_time: id_token.auth_time.unwrap_or(id_token.iat),
            email: id_token.email.clone(),
        }
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Create an RS256 signed JWT.
///
/// # Errors
///
/// Returns an error if the header or claims cannot be encoded.
pub fn sign_rs256<T: Serialize>(
    private_key: &RsaPrivateKey,
    kid: Option<&str>,
    claims: &T,
) -> Result<String, TokenError> {
    let header_b64 = b64e_json(&TokenHeader::rs256(kid))?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an RS256 ID token against the provider's keys and return its claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the header is not RS256 or its `kid` is missing or unknown for `jwks`,
/// - the signature is invalid,
/// - the claims fail validation (`aud`, `iss`, `sub`, `exp`, `iat`, `auth_time`).
pub fn verify_id_token(
    token: &str,
    jwks: &Jwks,
    project_id: &str,
    now_unix_seconds: i64,
) -> Result<IdTokenClaims, TokenError> {
    let claims: IdTokenClaims = decode_verified(token, |header| {
        let kid = header.kid.as_deref().ok_or(TokenError::MissingKid)?;
        jwks.find_by_kid(kid)
            .ok_or_else(|| TokenError::UnknownKid(kid.to_string()))?
            .to_rsa_public_key()
    })?;
    validate_claims(
        &ClaimsView {
            iss: &claims.iss,
            aud: &claims.aud,
            sub: &claims.sub,
            iat: claims.iat,
            exp: claims.exp,
            auth_time: claims.auth_time,
        },
        &format!("{ID_TOKEN_ISSUER_PREFIX}{project_id}"),
        project_id,
        now_unix_seconds,
    )?;
    Ok(claims)
}

/// Verify a session cookie signed with `public_key`'s private half.
///
/// The `kid` header is not consulted: the caller already knows which key minted
/// the cookie.
///
/// # Errors
///
/// Returns an error if the cookie is malformed, the signature does not match, or the
/// claims fail validation (session issuer, `aud`, `sub`, `exp`, `iat`).
pub fn verify_session_cookie(
    cookie: &str,
    public_key: &RsaPublicKey,
    project_id: &str,
    now_unix_seconds: i64,
) -> Result<SessionCookieClaims, TokenError> {
    let claims: SessionCookieClaims = decode_verified(cookie, |_| Ok(public_key.clone()))?;
    validate_claims(
        &ClaimsView {
            iss: &claims.iss,
            aud: &claims.aud,
            sub: &claims.sub,
            iat: claims.iat,
            exp: claims.exp,
            auth_time: Some(claims.auth_time),
        },
        &format!("{SESSION_COOKIE_ISSUER_PREFIX}{project_id}"),
        project_id,
        now_unix_seconds,
    )?;
    Ok(claims)
}

/// Split an RS256 JWT, check its signature with the key chosen from its header and
/// decode the claims.
fn decode_verified<T, F>(token: &str, select_key: F) -> Result<T, TokenError>
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(&TokenHeader) -> Result<RsaPublicKey, TokenError>,
{
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    if parts.next().is_some() {
        return Err(TokenError::TokenFormat);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(TokenError::UnsupportedAlg(header.alg));
    }

    let verifying_key = VerifyingKey::<Sha256>::new(select_key(&header)?);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| TokenError::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    b64d_json(claims_b64)
}

/// The registered claims shared by ID tokens and session cookies.
struct ClaimsView<'a> {
    iss: &'a str,
    aud: &'a str,
    sub: &'a str,
    iat: i64,
    exp: i64,
    auth_time: Option<i64>,
}

fn validate_claims(
    claims: &ClaimsView<'_>,
    issuer: &str,
    project_id: &str,
    now_unix_seconds: i64,
) -> Result<(), TokenError> {
    if claims.aud != project_id {
        return Err(TokenError::InvalidAudience);
    }
    if claims.iss != issuer {
        return Err(TokenError::InvalidIssuer);
    }
    if claims.sub.is_empty() || claims.sub.len() > MAX_SUBJECT_LEN {
        return Err(TokenError::InvalidSubject);
    }
    if claims.exp <= now_unix_seconds {
        return Err(TokenError::Expired);
    }
    if claims.iat > now_unix_seconds {
        return Err(TokenError::IssuedInFuture);
    }
    if claims.auth_time.is_some_and(|auth_time| auth_time > now_unix_seconds) {
        return Err(TokenError::IssuedInFuture);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::decode_private_key;
    use crate::test_support::{
        NOW, OTHER_PRIVATE_KEY_PEM, TEST_KID, TEST_PROJECT_ID, id_token_claims, signed_id_token,
        test_jwks,
    };
    use anyhow::Result;

    fn verify(token: &str) -> Result<IdTokenClaims, TokenError> {
        let jwks = test_jwks().map_err(|_| TokenError::KeyParse)?;
        verify_id_token(token, &jwks, TEST_PROJECT_ID, NOW)
    }

    #[test]
    fn accepts_valid_token() -> Result<()> {
        let token = signed_id_token(&id_token_claims(NOW))?;
        let claims = verify(&token)?;
        assert_eq!(claims.sub, "uid-ada");
        assert_eq!(claims.name.as_deref(), Some("Ada"));
        Ok(())
    }

    #[test]
    fn rejects_expired_token() -> Result<()> {
        let mut claims = id_token_claims(NOW);
        claims.exp = NOW;
        let token = signed_id_token(&claims)?;
        assert!(matches!(verify(&token), Err(TokenError::Expired)));
        Ok(())
    }

    #[test]
    fn rejects_token_for_other_project() -> Result<()> {
        let mut claims = id_token_claims(NOW);
        claims.aud = "other-project".to_string();
        let token = signed_id_token(&claims)?;
        assert!(matches!(verify(&token), Err(TokenError::InvalidAudience)));

        let mut claims = id_token_claims(NOW);
        claims.iss = "https://securetoken.google.com/other-project".to_string();
        let token = signed_id_token(&claims)?;
        assert!(matches!(verify(&token), Err(TokenError::InvalidIssuer)));
        Ok(())
    }

    #[test]
    fn rejects_empty_or_oversized_subject() -> Result<()> {
        let mut claims = id_token_claims(NOW);
        claims.sub = String::new();
        assert!(matches!(
            verify(&signed_id_token(&claims)?),
            Err(TokenError::InvalidSubject)
        ));

        claims.sub = "x".repeat(129);
        assert!(matches!(
            verify(&signed_id_token(&claims)?),
            Err(TokenError::InvalidSubject)
        ));
        Ok(())
    }

    #[test]
    fn rejects_token_issued_in_future() -> Result<()> {
        let mut claims = id_token_claims(NOW);
        claims.iat = NOW + 10;
        assert!(matches!(
            verify(&signed_id_token(&claims)?),
            Err(TokenError::IssuedInFuture)
        ));
        Ok(())
    }

    #[test]
    fn rejects_token_signed_by_other_key() -> Result<()> {
        let other = decode_private_key(OTHER_PRIVATE_KEY_PEM.as_bytes())?;
        let token = sign_rs256(&other, Some(TEST_KID), &id_token_claims(NOW))?;
        assert!(matches!(verify(&token), Err(TokenError::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_tampered_claims() -> Result<()> {
        let token = signed_id_token(&id_token_claims(NOW))?;
        let mut forged = id_token_claims(NOW);
        forged.sub = "uid-mallory".to_string();
        let forged_b64 = b64e_json(&forged)?;
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_b64, parts[2]);
        assert!(matches!(verify(&tampered), Err(TokenError::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_unknown_kid_and_missing_kid() -> Result<()> {
        let key = decode_private_key(crate::test_support::TEST_PRIVATE_KEY_PEM.as_bytes())?;
        let token = sign_rs256(&key, Some("rotated"), &id_token_claims(NOW))?;
        assert!(matches!(verify(&token), Err(TokenError::UnknownKid(kid)) if kid == "rotated"));

        let token = sign_rs256(&key, None, &id_token_claims(NOW))?;
        assert!(matches!(verify(&token), Err(TokenError::MissingKid)));
        Ok(())
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(verify("not-a-jwt"), Err(TokenError::TokenFormat)));
        assert!(matches!(verify("a.b.c.d"), Err(TokenError::TokenFormat)));
        assert!(matches!(verify("!!.e30.sig"), Err(TokenError::Base64)));
    }

    #[test]
    fn rejects_non_rs256_header() -> Result<()> {
        let header = b64e_json(&TokenHeader {
            alg: "none".to_string(),
            typ: None,
            kid: Some(TEST_KID.to_string()),
        })?;
        let claims = b64e_json(&id_token_claims(NOW))?;
        let token = format!("{header}.{claims}.");
        assert!(matches!(verify(&token), Err(TokenError::UnsupportedAlg(alg)) if alg == "none"));
        Ok(())
    }

    #[test]
    fn session_claims_span_requested_window() {
        let id_claims = id_token_claims(NOW);
        let claims = SessionCookieClaims::from_id_token(TEST_PROJECT_ID, &id_claims, NOW, 432_000);
        assert_eq!(claims.exp - claims.iat, 432_000);
        assert_eq!(claims.sub, "uid-ada");
        assert_eq!(
            claims.iss,
            "https://session.firebase.google.com/demo-project"
        );
        assert_eq!(claims.auth_time, NOW - 60);
    }

    #[test]
    fn rs256_signatures_are_deterministic() -> Result<()> {
        let claims = id_token_claims(NOW);
        assert_eq!(signed_id_token(&claims)?, signed_id_token(&claims)?);
        Ok(())
    }

    #[test]
    fn session_cookie_verifies_with_signing_key() -> Result<()> {
        let key = decode_private_key(crate::test_support::TEST_PRIVATE_KEY_PEM.as_bytes())?;
        let public_key = RsaPublicKey::from(&key);
        let claims = SessionCookieClaims::from_id_token(
            TEST_PROJECT_ID,
            &id_token_claims(NOW),
            NOW,
            432_000,
        );
        let cookie = sign_rs256(&key, None, &claims)?;

        let verified = verify_session_cookie(&cookie, &public_key, TEST_PROJECT_ID, NOW + 60)?;
        assert_eq!(verified, claims);

        assert!(matches!(
            verify_session_cookie(&cookie, &public_key, "other-project", NOW),
            Err(TokenError::InvalidAudience)
        ));
        assert!(matches!(
            verify_session_cookie(&cookie, &public_key, TEST_PROJECT_ID, NOW + 432_000),
            Err(TokenError::Expired)
        ));

        let other = RsaPublicKey::from(&decode_private_key(OTHER_PRIVATE_KEY_PEM.as_bytes())?);
        assert!(matches!(
            verify_session_cookie(&cookie, &other, TEST_PROJECT_ID, NOW),
            Err(TokenError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn id_token_is_not_a_session_cookie() -> Result<()> {
        let key = decode_private_key(crate::test_support::TEST_PRIVATE_KEY_PEM.as_bytes())?;
        let token = signed_id_token(&id_token_claims(NOW))?;
        let result = verify_session_cookie(&token, &RsaPublicKey::from(&key), TEST_PROJECT_ID, NOW);
        assert!(result.is_err());
        Ok(())
    }
}
