use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use tracing::{instrument, Level};

use crate::authorized_user::AuthorizedUser;
use crate::collaborators::Collaborators;
use crate::metadata_service_account::ComputeMetadata;
use crate::service_account::ServiceAccountKey;
use crate::token_cache::TokenCache;
use crate::types::Token;
use crate::Error;

/// A resolved credential of exactly one [`CredentialKind`]
///
/// The kind is fixed at construction. Token-issuing kinds cache their access token and
/// refresh it once `now + eager_refresh_threshold` reaches its expiry.
pub struct Credential {
    kind: CredentialKind,
    cache: TokenCache,
}

/// The source a [`Credential`] was materialized from
#[derive(Debug)]
#[non_exhaustive]
pub enum CredentialKind {
    /// A service account key file
    ServiceAccountKey(ServiceAccountKey),
    /// End-user credentials with a refresh token
    UserRefreshToken(AuthorizedUser),
    /// The GCE instance metadata server
    ComputeMetadata(ComputeMetadata),
    /// An API key, sent as the `X-Goog-Api-Key` header
    ApiKey(ApiKey),
    /// A pre-issued IAM authority selector and authorization token
    IamDelegated(IamDelegated),
}

impl Credential {
    pub(crate) fn new(kind: CredentialKind, eager_refresh_threshold: Duration) -> Self {
        Self {
            kind,
            cache: TokenCache::new(eager_refresh_threshold),
        }
    }

    /// A credential that authenticates requests with an API key
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::new(
            CredentialKind::ApiKey(ApiKey::new(key.into())),
            DEFAULT_EAGER_REFRESH_THRESHOLD,
        )
    }

    /// A credential that sends a pre-issued IAM authority selector and token
    pub fn iam_delegated(selector: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(
            CredentialKind::IamDelegated(IamDelegated {
                selector: selector.into(),
                token: token.into(),
            }),
            DEFAULT_EAGER_REFRESH_THRESHOLD,
        )
    }

    /// The kind of this credential and its kind-specific data
    pub fn kind(&self) -> &CredentialKind {
        &self.kind
    }

    /// A short name for the kind of this credential
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            CredentialKind::ServiceAccountKey(_) => "service_account",
            CredentialKind::UserRefreshToken(_) => "authorized_user",
            CredentialKind::ComputeMetadata(_) => "compute_metadata",
            CredentialKind::ApiKey(_) => "api_key",
            CredentialKind::IamDelegated(_) => "iam_delegated",
        }
    }

    /// How long before expiry the access token is refreshed
    pub fn eager_refresh_threshold(&self) -> Duration {
        self.cache.eager_refresh_threshold()
    }

    /// [`Credential::eager_refresh_threshold`] in milliseconds
    pub fn eager_refresh_threshold_millis(&self) -> u64 {
        u64::try_from(self.eager_refresh_threshold().as_millis()).unwrap_or(u64::MAX)
    }

    /// The project ID embedded in the credential file, if any
    pub fn project_id(&self) -> Option<&str> {
        match &self.kind {
            CredentialKind::ServiceAccountKey(key) => key.project_id(),
            CredentialKind::UserRefreshToken(user) => user.quota_project_id(),
            _ => None,
        }
    }

    /// The service account email, if known without any I/O
    pub fn client_email(&self) -> Option<&str> {
        match &self.kind {
            CredentialKind::ServiceAccountKey(key) => Some(key.client_email()),
            _ => None,
        }
    }

    /// Get a valid access token, refreshing it first if it is missing or about to expire
    #[instrument(level = Level::DEBUG, skip(self), fields(kind = self.describe()))]
    pub async fn access_token(&self) -> Result<Arc<Token>, Error> {
        let Some(deps) = self.deps() else {
            return Err(Error::Str("credential kind does not issue access tokens"));
        };

        self.cache
            .get_or_refresh(
                || deps.clock.now(),
                || async {
                    self.fetch_token()
                        .await
                        .map_err(|err| Error::TokenRefreshFailed(Box::new(err)))
                },
            )
            .await
    }

    /// The headers that authenticate a request with this credential
    pub async fn request_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        match &self.kind {
            CredentialKind::ApiKey(api_key) => {
                headers.insert(API_KEY_HEADER, header_value(&api_key.key)?);
            }
            CredentialKind::IamDelegated(iam) => {
                headers.insert(IAM_SELECTOR_HEADER, header_value(&iam.selector)?);
                headers.insert(IAM_TOKEN_HEADER, header_value(&iam.token)?);
            }
            _ => {
                let token = self.access_token().await?;
                headers.insert(
                    AUTHORIZATION,
                    header_value(&format!("Bearer {}", token.as_str()))?,
                );
                if let CredentialKind::UserRefreshToken(user) = &self.kind {
                    if let Some(project) = user.quota_project_id() {
                        headers.insert(USER_PROJECT_HEADER, header_value(project)?);
                    }
                }
            }
        }

        Ok(headers)
    }

    fn deps(&self) -> Option<&Collaborators> {
        match &self.kind {
            CredentialKind::ServiceAccountKey(key) => Some(&key.deps),
            CredentialKind::UserRefreshToken(user) => Some(&user.deps),
            CredentialKind::ComputeMetadata(compute) => Some(&compute.deps),
            CredentialKind::ApiKey(_) | CredentialKind::IamDelegated(_) => None,
        }
    }

    async fn fetch_token(&self) -> Result<Token, Error> {
        match &self.kind {
            CredentialKind::ServiceAccountKey(key) => key.fetch_token().await,
            CredentialKind::UserRefreshToken(user) => user.fetch_token().await,
            CredentialKind::ComputeMetadata(compute) => compute.fetch_token().await,
            CredentialKind::ApiKey(_) | CredentialKind::IamDelegated(_) => {
                Err(Error::Str("credential kind does not issue access tokens"))
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn set_token(&self, token: Token) {
        self.cache.set(token).await
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("eager_refresh_threshold", &self.eager_refresh_threshold())
            .finish()
    }
}

/// An API key
pub struct ApiKey {
    key: String,
}

impl ApiKey {
    pub(crate) fn new(key: String) -> Self {
        Self { key }
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey").finish_non_exhaustive()
    }
}

/// An IAM authority selector with its authorization token
pub struct IamDelegated {
    selector: String,
    token: String,
}

impl IamDelegated {
    /// The IAM authority selector
    pub fn selector(&self) -> &str {
        &self.selector
    }
}

impl fmt::Debug for IamDelegated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamDelegated")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    let mut value =
        HeaderValue::from_str(value).map_err(|_| Error::Str("credential is not a valid header"))?;
    value.set_sensitive(true);
    Ok(value)
}

pub(crate) const DEFAULT_EAGER_REFRESH_THRESHOLD: Duration = Duration::from_millis(300_000);

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");
const USER_PROJECT_HEADER: HeaderName = HeaderName::from_static("x-goog-user-project");
const IAM_SELECTOR_HEADER: HeaderName = HeaderName::from_static("x-goog-iam-authority-selector");
const IAM_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-goog-iam-authorization-token");
