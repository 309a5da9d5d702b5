//! AWS Signature Version 4 for S3 compatible object stores
//!
//! Two forms are supported: header signing for API calls made from here, and
//! query signing (presigned URLs) for downloads the bootstrap node makes with
//! plain `curl`.

use aws_lc_rs::{digest, hmac};
use chrono::{DateTime, Utc};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Payload hash used by presigned URLs
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Request signer bound to one credential pair and region
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
    region: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// The parts of a request that are covered by the signature
#[derive(Clone, Copy, Debug)]
pub struct RequestParts<'a> {
    /// HTTP method
    pub method: &'a str,
    /// `host[:port]` exactly as sent
    pub host: &'a str,
    /// Absolute path, not yet percent-encoded
    pub path: &'a str,
    /// Decoded query parameters
    pub query: &'a [(String, String)],
}

impl Signer {
    /// Signer for `region`, falling back to [`DEFAULT_REGION`] when empty
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let region = region.into();
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: if region.is_empty() {
                DEFAULT_REGION.to_string()
            } else {
                region
            },
        }
    }

    /// Headers that authorize `request` with `payload` as the body.
    ///
    /// The caller must send `host` unchanged and the returned headers verbatim.
    pub fn sign_headers(
        &self,
        request: RequestParts<'_>,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let timestamp = amz_timestamp(now);
        let payload_hash = sha256_hex(payload);
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            request.host, payload_hash, timestamp
        );

        let canonical = canonical_request(
            request.method,
            request.path,
            &canonical_query(request.query),
            &canonical_headers,
            signed_headers,
            &payload_hash,
        );
        let signature = self.signature(now, &canonical);

        vec![
            ("x-amz-date", timestamp),
            ("x-amz-content-sha256", payload_hash),
            (
                "authorization",
                format!(
                    "{ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
                    self.access_key,
                    self.scope(now)
                ),
            ),
        ]
    }

    /// Canonical query string of a presigned URL for `request`, signature
    /// included. Append it after `?`.
    pub fn presign_query(&self, request: RequestParts<'_>, expires_secs: u64, now: DateTime<Utc>) -> String {
        let mut query = request.query.to_vec();
        query.extend([
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.access_key, self.scope(now)),
            ),
            ("X-Amz-Date".to_string(), amz_timestamp(now)),
            ("X-Amz-Expires".to_string(), expires_secs.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ]);
        let query_string = canonical_query(&query);

        let canonical = canonical_request(
            request.method,
            request.path,
            &query_string,
            &format!("host:{}\n", request.host),
            "host",
            UNSIGNED_PAYLOAD,
        );
        let signature = self.signature(now, &canonical);
        format!("{query_string}&X-Amz-Signature={signature}")
    }

    fn scope(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{SERVICE}/aws4_request",
            now.format("%Y%m%d"),
            self.region
        )
    }

    fn signature(&self, now: DateTime<Utc>, canonical_request: &str) -> String {
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{}\n{}",
            amz_timestamp(now),
            self.scope(now),
            sha256_hex(canonical_request.as_bytes())
        );

        let date = now.format("%Y%m%d").to_string();
        let k_date = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

fn canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{}\n{query}\n{headers}\n{signed_headers}\n{payload_hash}",
        uri_encode(path, false)
    )
}

/// Query parameters encoded and sorted the way the signature expects
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 percent-encoding; `/` is kept in paths and encoded in queries
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn amz_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}
