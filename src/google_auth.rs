use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, Level};

use crate::collaborators::Collaborators;
use crate::credential::{Credential, CredentialKind, DEFAULT_EAGER_REFRESH_THRESHOLD};
use crate::types::Token;
use crate::{credential_source, metadata, project_id, signer, Error, TokenProvider};

/// Options for [`GoogleAuth`]
///
/// Every option is optional; by default the credential and the project ID are detected
/// from the environment.
#[derive(Clone)]
pub struct GoogleAuthOptions {
    pub(crate) credentials: Option<serde_json::Value>,
    pub(crate) key_filename: Option<PathBuf>,
    pub(crate) project_id: Option<String>,
    pub(crate) scopes: Vec<String>,
    pub(crate) subject: Option<String>,
    pub(crate) api_key: Option<String>,
    pub(crate) eager_refresh_threshold: Duration,
}

impl GoogleAuthOptions {
    /// Use the given credential JSON instead of looking for a credentials file
    ///
    /// The JSON must have the shape of a service account key file or of an
    /// `authorized_user` file as written by `gcloud auth application-default login`.
    pub fn with_credentials(mut self, credentials: serde_json::Value) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Read credentials from the given file before consulting the environment
    pub fn with_key_filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_filename = Some(path.into());
        self
    }

    /// Use the given project ID instead of detecting one
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// OAuth2 scopes to request tokens for
    ///
    /// Defaults to `https://www.googleapis.com/auth/cloud-platform`.
    pub fn with_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Impersonate the given user with a service account key (domain-wide delegation)
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Authenticate with an API key; no other credential source is consulted
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// How long before expiry access tokens are refreshed, five minutes by default
    ///
    /// With [`Duration::ZERO`], tokens are only refreshed once they have expired.
    pub fn with_eager_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.eager_refresh_threshold = threshold;
        self
    }
}

impl Default for GoogleAuthOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            key_filename: None,
            project_id: None,
            scopes: Vec::new(),
            subject: None,
            api_key: None,
            eager_refresh_threshold: DEFAULT_EAGER_REFRESH_THRESHOLD,
        }
    }
}

impl fmt::Debug for GoogleAuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleAuthOptions")
            .field("credentials", &self.credentials.as_ref().map(|_| "..."))
            .field("key_filename", &self.key_filename)
            .field("project_id", &self.project_id)
            .field("scopes", &self.scopes)
            .field("subject", &self.subject)
            .field("api_key", &self.api_key.as_ref().map(|_| "..."))
            .field("eager_refresh_threshold", &self.eager_refresh_threshold)
            .finish()
    }
}

/// Resolves application default credentials and the project ID
///
/// The compute environment probe, the credential and the project ID are each resolved
/// lazily on first use and then cached for the lifetime of the instance. Concurrent callers
/// share a single resolution in flight. A failed resolution is not cached, so the next
/// call tries again.
///
/// Instances never share state with each other; create one and reuse it.
#[derive(Debug)]
pub struct GoogleAuth {
    options: GoogleAuthOptions,
    deps: Collaborators,
    is_compute: OnceCell<bool>,
    credential: OnceCell<Arc<Credential>>,
    project_id: OnceCell<Arc<str>>,
}

impl GoogleAuth {
    /// Create a resolver that performs real I/O
    pub fn new(options: GoogleAuthOptions) -> Result<Self, Error> {
        Ok(Self::with_collaborators(options, Collaborators::new()?))
    }

    /// Create a resolver that performs all I/O through `deps`
    pub fn with_collaborators(options: GoogleAuthOptions, deps: Collaborators) -> Self {
        Self {
            options,
            deps,
            is_compute: OnceCell::new(),
            credential: OnceCell::new(),
            project_id: OnceCell::new(),
        }
    }

    /// Whether the process runs on GCE, as determined by probing the metadata server
    pub async fn is_compute(&self) -> Result<bool, Error> {
        self.is_compute
            .get_or_try_init(|| metadata::probe(self.deps.http.as_ref(), self.deps.env.as_ref()))
            .await
            .copied()
    }

    /// The application default credential
    #[instrument(level = Level::DEBUG, skip(self))]
    pub async fn credential(&self) -> Result<Arc<Credential>, Error> {
        self.credential
            .get_or_try_init(|| async {
                let credential =
                    credential_source::resolve(&self.options, &self.deps, self.is_compute())
                        .await?;
                debug!(kind = credential.describe(), "resolved credential");
                Ok(Arc::new(credential))
            })
            .await
            .cloned()
    }

    /// The active project ID
    #[instrument(level = Level::DEBUG, skip(self))]
    pub async fn project_id(&self) -> Result<Arc<str>, Error> {
        self.project_id
            .get_or_try_init(|| async {
                let project_id =
                    project_id::resolve(&self.options, &self.deps, self.is_compute()).await?;
                debug!(%project_id, "resolved project ID");
                Ok(Arc::from(project_id))
            })
            .await
            .cloned()
    }

    /// A valid access token of the application default credential
    pub async fn access_token(&self) -> Result<Arc<Token>, Error> {
        self.credential().await?.access_token().await
    }

    /// The headers that authenticate a request with the application default credential
    pub async fn request_headers(&self) -> Result<HeaderMap, Error> {
        self.credential().await?.request_headers().await
    }

    /// The email of the service account behind the application default credential
    pub async fn client_email(&self) -> Result<String, Error> {
        let credential = self.credential().await?;
        match credential.kind() {
            CredentialKind::ServiceAccountKey(key) => Ok(key.client_email().to_owned()),
            CredentialKind::ComputeMetadata(compute) => Ok(compute.email().await?.to_owned()),
            _ => Err(Error::SigningUnavailable(
                "credential is not associated with a service account",
            )),
        }
    }

    /// Sign `payload` with RSA PKCS1 SHA256 as the service account of the credential
    ///
    /// Signs locally if the credential carries a private key. On GCE, the signature is
    /// requested from the IAM `signBlob` API, which needs the project ID.
    pub async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let credential = self.credential().await?;
        signer::sign(&credential, self.project_id(), payload).await
    }

    /// The credential together with the project ID, if one can be found
    pub async fn application_default(
        &self,
    ) -> Result<(Arc<Credential>, Option<Arc<str>>), Error> {
        let credential = self.credential().await?;
        match self.project_id().await {
            Ok(project_id) => Ok((credential, Some(project_id))),
            Err(Error::ProjectIdNotFound) => Ok((credential, None)),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl TokenProvider for GoogleAuth {
    async fn token(&self) -> Result<Arc<Token>, Error> {
        self.access_token().await
    }

    async fn project_id(&self) -> Result<Arc<str>, Error> {
        GoogleAuth::project_id(self).await
    }
}
