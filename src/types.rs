use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use chrono::{DateTime, TimeDelta, Utc};
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::PrivateKeyDer;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::collaborators::HttpFetcher;
use crate::Error;

/// A hyper-based [`HttpFetcher`] with rustls
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        Full<Bytes>,
    >,
}

impl HttpClient {
    /// Build a client that trusts the configured root certificates
    pub fn new() -> Result<Self, Error> {
        #[cfg(feature = "webpki-roots")]
        let https = HttpsConnectorBuilder::new().with_webpki_roots();
        #[cfg(not(feature = "webpki-roots"))]
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|err| {
                Error::Io("failed to load native TLS root certificates for HTTPS", err)
            })?;

        Ok(Self {
            inner: Client::builder(TokioExecutor::new())
                .build(https.https_or_http().enable_http2().build()),
        })
    }
}

#[async_trait]
impl HttpFetcher for HttpClient {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        debug!(method = %request.method(), url = %request.uri(), "sending request");
        let response: hyper::Response<Incoming> = self
            .inner
            .request(request.map(Full::new))
            .await
            .map_err(|err| {
                if is_dns_failure(&err) {
                    Error::HostNotFound("HTTP request failed", Box::new(err))
                } else {
                    Error::Transport("HTTP request failed", Box::new(err))
                }
            })?;

        let (parts, body) = response.into_parts();

        let mut body = body
            .collect()
            .await
            .map_err(|err| Error::Transport("failed to read HTTP response body", Box::new(err)))?
            .aggregate();

        Ok(Response::from_parts(
            parts,
            body.copy_to_bytes(body.remaining()),
        ))
    }
}

/// hyper-util reports resolver failures as a connect error whose source reads "dns error"
fn is_dns_failure(err: &hyper_util::client::legacy::Error) -> bool {
    if !err.is_connect() {
        return false;
    }

    let mut source = err.source();
    while let Some(err) = source {
        if err.to_string().contains("dns error") {
            return true;
        }
        source = err.source();
    }
    false
}

/// Fail with [`Error::Server`] unless the response status is a success
pub(crate) fn check_status(response: Response<Bytes>) -> Result<Bytes, Error> {
    let (parts, body) = response.into_parts();
    if !parts.status.is_success() {
        let body = String::from_utf8_lossy(&body).into_owned();
        warn!(%body, status = ?parts.status, "request failed");
        return Err(Error::Server(parts.status, body));
    }

    Ok(body)
}

/// Check the status and deserialize the JSON body
pub(crate) fn json_body<T: DeserializeOwned>(
    response: Response<Bytes>,
    context: &'static str,
) -> Result<T, Error> {
    let body = check_status(response)?;
    serde_json::from_slice(&body).map_err(|err| Error::Json(context, err))
}

/// Represents an access token that can be used as a bearer token in HTTP requests
///
/// Tokens should not be cached, each [`Credential`] handles the correct caching already.
///
/// The token does not implement [`Display`] to avoid accidentally printing the token in log
/// files, likewise [`Debug`] does not expose the token value itself which is only available
/// using the [`Token::as_str`] method.
///
/// [`Credential`]: crate::Credential
/// [`Display`]: fmt::Display
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub(crate) fn new(access_token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Token {
            access_token,
            expires_at,
        }
    }

    /// Get str representation of the token.
    pub fn as_str(&self) -> &str {
        &self.access_token
    }

    /// Get expiry of token, if available
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Expiry as milliseconds since the Unix epoch, if available
    pub fn expiry_epoch_millis(&self) -> Option<i64> {
        self.expires_at.map(|at| at.timestamp_millis())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token data as returned by the OAuth2 token endpoint and the metadata server
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

impl TokenResponse {
    /// Anchor the relative `expires_in` to `now`
    pub(crate) fn into_token(self, now: DateTime<Utc>) -> Result<Token, Error> {
        let expires_at = match self.expires_in {
            Some(seconds) => Some(
                i64::try_from(seconds)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or(Error::Str("token expiry is out of range"))?,
            ),
            None => None,
        };

        Ok(Token::new(self.access_token, expires_at))
    }
}

/// An RSA PKCS1 SHA256 signer
pub struct Signer {
    key: RsaKeyPair,
    rng: SystemRandom,
}

impl Signer {
    /// Parse a PKCS#8 or PKCS#1 PEM-encoded RSA private key
    pub fn new(pem: &str) -> Result<Self, Error> {
        let key = PrivateKeyDer::from_pem_slice(pem.as_bytes())
            .map_err(|_| Error::Str("no private key found in credentials private key data"))?;

        let key = match &key {
            PrivateKeyDer::Pkcs8(key) => RsaKeyPair::from_pkcs8(key.secret_pkcs8_der()),
            PrivateKeyDer::Pkcs1(key) => RsaKeyPair::from_der(key.secret_pkcs1_der()),
            _ => return Err(Error::Str("unsupported private key type in credentials")),
        }
        .map_err(|_| Error::Str("invalid private key in credentials"))?;

        Ok(Signer {
            key,
            rng: SystemRandom::new(),
        })
    }

    /// Sign the input message and return the signature
    pub fn sign(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signature = vec![0; self.key.public().modulus_len()];
        self.key
            .sign(&RSA_PKCS1_SHA256, &self.rng, input, &mut signature)
            .map_err(|_| Error::Str("failed to sign with credentials key"))?;
        Ok(signature)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish()
    }
}
