//! AWS Signature Version 4 for JSON POST requests.

use crate::config::AwsCredentials;
use crate::errors::ContainerError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// One request to sign.
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    /// `host[:port]` as sent in the Host header.
    pub host: &'a str,
    /// URL path, `/` for the JSON APIs.
    pub path: &'a str,
    /// Headers to sign besides host and x-amz-date, lowercase names.
    pub headers: &'a [(&'a str, &'a str)],
    /// Request body.
    pub body: &'a [u8],
}

/// Headers to add to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// `Authorization` value.
    pub authorization: String,
    /// `x-amz-date` value.
    pub amz_date: String,
    /// `x-amz-security-token` value, for temporary credentials.
    pub security_token: Option<String>,
}

/// Signs a POST for `service` in `region` at time `now`.
///
/// # Errors
///
/// Returns [`ContainerError::Signing`] if the HMAC cannot be keyed.
pub fn sign_post(
    request: &SignableRequest<'_>,
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<Signature, ContainerError> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let token = credentials
        .session_token
        .as_ref()
        .map(|t| t.expose().to_string());

    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    headers.push(("host".to_string(), request.host.to_string()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(ref token) = token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort();

    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let payload_hash = hex::encode(Sha256::digest(request.body));

    let canonical_request = format!(
        "POST\n{}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        request.path
    );

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign =
        format!("AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{canonical_hash}");

    let signing_key = derive_signing_key(
        credentials.secret_access_key.expose(),
        &date_stamp,
        region,
        service,
    )?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    Ok(Signature {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
        amz_date,
        security_token: token,
    })
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| ContainerError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn derive_signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, ContainerError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}
