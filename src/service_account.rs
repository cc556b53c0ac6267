use std::fmt;

use base64::{engine::general_purpose::URL_SAFE, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::CONTENT_TYPE;
use http::Request;
use serde::Serialize;
use tracing::{debug, instrument, Level};
use url::form_urlencoded;

use crate::collaborators::Collaborators;
use crate::types::{json_body, Signer, Token, TokenResponse};
use crate::Error;

/// Credentials from a service account key file
///
/// The private key is only parsed when it is needed, to sign a JWT assertion or a payload.
pub struct ServiceAccountKey {
    pub(crate) client_email: String,
    pub(crate) private_key: String,
    pub(crate) private_key_id: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) project_id: Option<String>,
    pub(crate) token_uri: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) scopes: Vec<String>,
    pub(crate) deps: Collaborators,
}

impl ServiceAccountKey {
    /// The service account's email address
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// The project ID as found in the key file
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// The ID of the private key, if the key file names it
    pub fn private_key_id(&self) -> Option<&str> {
        self.private_key_id.as_deref()
    }

    /// The OAuth2 client ID of the service account, if the key file names it
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// The user impersonated through domain-wide delegation
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// The private key as found in the key file
    pub fn private_key_pem(&self) -> &str {
        &self.private_key
    }

    /// The RSA PKCS1 SHA256 [`Signer`] for the private key
    pub fn signer(&self) -> Result<Signer, Error> {
        Signer::new(&self.private_key)
    }

    fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    #[instrument(level = Level::DEBUG, skip(self), fields(email = %self.client_email))]
    pub(crate) async fn fetch_token(&self) -> Result<Token, Error> {
        let now = self.deps.clock.now();
        let jwt = Claims::new(self, now).to_jwt(&self.signer()?)?;
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&[("grant_type", GRANT_TYPE), ("assertion", jwt.as_str())])
            .finish();

        let request = Request::post(self.token_uri())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from(body))
            .map_err(|_| Error::Str("invalid token URI in service account credentials"))?;

        debug!(token_uri = self.token_uri(), "requesting token with JWT assertion");
        let response = self.deps.http.fetch(request).await?;
        let token = json_body::<TokenResponse>(response, "failed to deserialize token response")?;
        token.into_token(now)
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("subject", &self.subject)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Permissions requested for a JWT.
/// See https://developers.google.com/identity/protocols/OAuth2ServiceAccount#authorizingrequests.
#[derive(Serialize, Debug)]
struct Claims<'a> {
    iss: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
    scope: String,
}

impl<'a> Claims<'a> {
    fn new(key: &'a ServiceAccountKey, now: DateTime<Utc>) -> Self {
        let scope = if key.scopes.is_empty() {
            DEFAULT_SCOPE.to_owned()
        } else {
            key.scopes.join(" ")
        };

        let iat = now.timestamp();
        Claims {
            iss: &key.client_email,
            aud: key.token_uri(),
            exp: iat + 3600, // Max validity is 1h
            iat,
            sub: key.subject.as_deref(),
            scope,
        }
    }

    fn to_jwt(&self, signer: &Signer) -> Result<String, Error> {
        let claims = serde_json::to_string(self)
            .map_err(|err| Error::Json("failed to serialize JWT claims", err))?;

        let mut jwt = String::new();
        URL_SAFE.encode_string(GOOGLE_RS256_HEAD, &mut jwt);
        jwt.push('.');
        URL_SAFE.encode_string(claims, &mut jwt);

        let signature = signer.sign(jwt.as_bytes())?;
        jwt.push('.');
        URL_SAFE.encode_string(&signature, &mut jwt);
        Ok(jwt)
    }
}

pub(crate) const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub(crate) const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const GOOGLE_RS256_HEAD: &str = r#"{"alg":"RS256","typ":"JWT"}"#;
