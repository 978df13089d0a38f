//! `bce-auth-v1` request signing for the access-key scheme.

use crate::error::Error;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderValue, AUTHORIZATION, HOST};
use reqwest::Request;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const BCE_DATE: &str = "x-bce-date";

/// Signs each outgoing request with an access key pair. No token exchange.
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: SecretString,
    expiration_secs: u64,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("expiration_secs", &self.expiration_secs)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(access_key: impl Into<String>, secret_key: SecretString, expiration_secs: u64) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key,
            expiration_secs,
        }
    }

    /// Sign `request` in place using the current time.
    pub fn sign(&self, request: &mut Request) -> Result<(), Error> {
        self.sign_at(request, Utc::now())
    }

    fn sign_at(&self, request: &mut Request, now: DateTime<Utc>) -> Result<(), Error> {
        let timestamp = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let host = host_header(request)?;

        let headers = request.headers_mut();
        headers.insert(HOST, header_value(&host)?);
        headers.insert(BCE_DATE, header_value(&timestamp)?);

        let prefix = format!(
            "bce-auth-v1/{}/{}/{}",
            self.access_key, timestamp, self.expiration_secs
        );
        let (canonical, signed_headers) = canonical_request(request);
        let signing_key = hmac_sha256_hex(self.secret_key.expose_secret().as_bytes(), prefix.as_bytes());
        let signature = hmac_sha256_hex(signing_key.as_bytes(), canonical.as_bytes());

        let auth = format!("{prefix}/{signed_headers}/{signature}");
        request.headers_mut().insert(AUTHORIZATION, header_value(&auth)?);
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|e| Error::config(format!("invalid header value: {e}")))
}

fn host_header(request: &Request) -> Result<String, Error> {
    let url = request.url();
    let host = url
        .host_str()
        .ok_or_else(|| Error::config(format!("url has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Build the canonical request string and the `;`-joined signed header list.
fn canonical_request(request: &Request) -> (String, String) {
    let url = request.url();

    let uri = url
        .path()
        .split('/')
        .map(|segment| {
            let raw = urlencoding::decode(segment).map_or_else(|_| segment.into(), |s| s);
            urlencoding::encode(&raw).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/");

    let mut query: Vec<String> = url
        .query_pairs()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("authorization"))
        .map(|(k, v)| format!("{}={}", urlencoding::encode(&k), urlencoding::encode(&v)))
        .collect();
    query.sort();

    let mut headers: Vec<(&str, String)> = ["host", "content-type", BCE_DATE]
        .into_iter()
        .filter_map(|name| {
            let value = request.headers().get(name)?.to_str().ok()?;
            Some((name, urlencoding::encode(value.trim()).into_owned()))
        })
        .collect();
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let signed = headers.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(";");
    let canonical_headers = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("\n");

    let canonical = format!(
        "{}\n{}\n{}\n{}",
        request.method().as_str(),
        uri,
        query.join("&"),
        canonical_headers
    );
    (canonical, signed)
}
