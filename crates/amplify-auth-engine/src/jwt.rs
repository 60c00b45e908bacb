//! JWT helpers: payload decoding and client assertion signing.
//!
//! Tokens received from the authorization server are decoded without
//! verifying their signature. They arrive over TLS straight from the issuer
//! and are only read for display identity (email, org, session id), never
//! for access decisions.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AuthEngineError, Result};

/// Lifetime of a signed client assertion.
pub const CLIENT_ASSERTION_TTL_SECS: i64 = 60 * 60;

/// Assertion type sent alongside a signed client assertion.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Decode the payload segment of a compact JWT.
///
/// # Errors
///
/// Returns [`AuthEngineError::AuthFailed`] if the token is not a JWT or the
/// payload is not a JSON object.
pub fn decode_payload(token: &str) -> Result<Map<String, Value>> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_header), Some(payload)) if !payload.is_empty() => payload,
        _ => return Err(AuthEngineError::auth_failed("token is not a JWT")),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthEngineError::auth_failed(format!("JWT payload is not base64url: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(claims) => Ok(claims),
        _ => Err(AuthEngineError::auth_failed("JWT payload is not an object")),
    }
}

/// Identity claims we care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenIdentity {
    pub email: Option<String>,
    pub org_id: Option<String>,
    pub sid: Option<String>,
}

impl TokenIdentity {
    pub fn from_claims(claims: &Map<String, Value>) -> Self {
        Self {
            email: string_claim(claims, "email"),
            org_id: string_claim(claims, "orgId"),
            sid: string_claim(claims, "sid").or_else(|| string_claim(claims, "session_state")),
        }
    }
}

/// A string claim, accepting numbers as well (`orgId` is numeric on some
/// realms).
fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Serialize)]
struct ClientAssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    jti: String,
    iat: i64,
    exp: i64,
}

/// Sign a short-lived RS256 client assertion for the token endpoint.
///
/// # Errors
///
/// Returns [`AuthEngineError::InvalidSigningKey`] if signing fails.
pub fn sign_client_assertion(key: &EncodingKey, client_id: &str, audience: &str) -> Result<String> {
    let iat = chrono::Utc::now().timestamp();
    let claims = ClientAssertionClaims {
        iss: client_id,
        sub: client_id,
        aud: audience,
        jti: uuid::Uuid::now_v7().to_string(),
        iat,
        exp: iat + CLIENT_ASSERTION_TTL_SECS,
    };

    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key).map_err(|e| {
        AuthEngineError::InvalidSigningKey {
            reason: e.to_string(),
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An unsigned JWT carrying `claims`.
    pub(crate) fn unsigned_token(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    }

    #[test]
    fn decode_reads_payload() {
        let token = unsigned_token(&serde_json::json!({ "email": "foo@bar.com", "orgId": 42 }));
        let claims = decode_payload(&token).unwrap();
        let identity = TokenIdentity::from_claims(&claims);
        assert_eq!(identity.email.as_deref(), Some("foo@bar.com"));
        assert_eq!(identity.org_id.as_deref(), Some("42"));
        assert!(identity.sid.is_none());
    }

    #[test]
    fn decode_tolerates_padding() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"sid":"abc"}"#);
        let claims = decode_payload(&format!("h.{payload}.s")).unwrap();
        assert_eq!(TokenIdentity::from_claims(&claims).sid.as_deref(), Some("abc"));
    }

    #[test]
    fn session_state_is_a_sid_fallback() {
        let token = unsigned_token(&serde_json::json!({ "session_state": "s-1" }));
        let identity = TokenIdentity::from_claims(&decode_payload(&token).unwrap());
        assert_eq!(identity.sid.as_deref(), Some("s-1"));
    }

    #[test]
    fn decode_rejects_opaque_tokens() {
        assert!(decode_payload("opaque-access-token").is_err());
        assert!(decode_payload("a.!!!.c").is_err());

        let not_object = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(decode_payload(&not_object).is_err());
    }

    #[test]
    fn client_assertion_claims() {
        let pem = include_str!("../tests/fixtures/signing_key.pem");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();

        let assertion = sign_client_assertion(&key, "svc-client", "https://x/token").unwrap();
        let claims = decode_payload(&assertion).unwrap();

        assert_eq!(claims["iss"], "svc-client");
        assert_eq!(claims["sub"], "svc-client");
        assert_eq!(claims["aud"], "https://x/token");
        let iat = claims["iat"].as_i64().unwrap();
        let exp = claims["exp"].as_i64().unwrap();
        assert_eq!(exp - iat, CLIENT_ASSERTION_TTL_SECS);

        let again = sign_client_assertion(&key, "svc-client", "https://x/token").unwrap();
        assert_ne!(decode_payload(&again).unwrap()["jti"], claims["jti"]);
    }
}
