use crate::error::ClaimsError;
use crate::models::session::Identity;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer};

/// Claims carried in a sitebook access token payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    #[serde(alias = "sub", deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub company_id: Option<String>,
    #[serde(default, alias = "display_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry as Unix timestamp (seconds since epoch)
    #[serde(default)]
    pub exp: Option<i64>,
}

impl AccessClaims {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            company_id: self.company_id.clone(),
            display_name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    /// True when the token expires within `window_secs` of `now`.
    /// Tokens without an `exp` claim never count as expiring.
    pub fn expires_within(&self, window_secs: i64, now: i64) -> bool {
        match self.exp {
            Some(exp) => exp - now <= window_secs,
            None => false,
        }
    }
}

/// Decode access token claims without validation
///
/// Only the payload segment is read. The signature is NOT checked: the token
/// was issued to us by the API, which verifies it on every request. The
/// decoded claims are used for display and routing only.
pub fn decode_claims(token: &str) -> Result<AccessClaims, ClaimsError> {
    let parts: Vec<&str> = token.split('.').collect();

    if parts.len() != 3 {
        return Err(ClaimsError::Malformed(parts.len()));
    }

    // Some issuers pad the segments
    let payload = general_purpose::URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('='))?;

    Ok(serde_json::from_slice(&payload)?)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeId {
        Text(String),
        Number(i64),
        Null,
    }

    Ok(match MaybeId::deserialize(deserializer)? {
        MaybeId::Text(s) => Some(s),
        MaybeId::Number(n) => Some(n.to_string()),
        MaybeId::Null => None,
    })
}

/// Build an unsigned token around `payload`. Test helper for every suite.
#[cfg(test)]
pub(crate) fn encode_test_token(payload: &serde_json::Value) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}
