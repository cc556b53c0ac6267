//! GCP application default credentials (ADC)
//!
//! This crate locates, caches and refreshes the credentials used to authenticate outbound
//! requests to Google Cloud Platform (GCP), without the caller having to know which source
//! the credentials came from. The entry point is [`GoogleAuth`], which resolves a
//! [`Credential`] from the first available source:
//!
//! 1. Credential JSON supplied in-memory through [`GoogleAuthOptions::with_credentials`].
//! 2. A key file supplied through [`GoogleAuthOptions::with_key_filename`].
//! 3. The file named by the `GOOGLE_APPLICATION_CREDENTIALS` environment variable.
//! 4. The well-known `gcloud` file, `$HOME/.config/gcloud/application_default_credentials.json`
//!    (`%APPDATA%\gcloud\application_default_credentials.json` on Windows), which is
//!    created by `gcloud auth application-default login`.
//! 5. The GCE instance metadata server, if the process is running inside GCP.
//!
//! Each [`Credential`] keeps its access token cached and refreshes it eagerly, five minutes
//! before it expires by default. Callers should not cache tokens themselves.
//!
//! ## Simple usage
//!
//! ```rust,no_run
//! # async fn get_token() -> Result<(), gcp_adc::Error> {
//! use gcp_adc::{GoogleAuth, GoogleAuthOptions};
//!
//! let auth = GoogleAuth::new(GoogleAuthOptions::default())?;
//! let token = auth.access_token().await?;
//! let project_id = auth.project_id().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Signing
//!
//! [`GoogleAuth::sign`] signs a payload with RSA-SHA256 locally when the credential carries a
//! private key, and otherwise delegates to the IAM `signBlob` API using the identity of the
//! compute service account.
//!
//! ## Testing
//!
//! All I/O goes through the traits in [`Collaborators`]: HTTP, file reads, the `gcloud`
//! subprocess, environment variables and the clock. Construct a resolver with
//! [`GoogleAuth::with_collaborators`] to substitute any of them.

#![warn(unreachable_pub)]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod authorized_user;
pub use authorized_user::AuthorizedUser;

mod collaborators;
pub use collaborators::{
    Clock, Collaborators, CommandOutput, CommandRunner, Env, FileReader, FsReader, HttpFetcher,
    ProcessEnv, ProcessRunner, SystemClock,
};

mod credential;
pub use credential::{ApiKey, Credential, CredentialKind, IamDelegated};

mod credential_source;

mod google_auth;
pub use google_auth::{GoogleAuth, GoogleAuthOptions};

mod metadata;

mod metadata_service_account;
pub use metadata_service_account::ComputeMetadata;

mod project_id;

mod service_account;
pub use service_account::ServiceAccountKey;

mod signer;

mod token_cache;

mod types;
pub use types::{HttpClient, Signer, Token};

#[cfg(test)]
mod testing;

/// Resolve the application default credential and return it as a [`TokenProvider`]
///
/// This is a shortcut for [`GoogleAuth::new`] with default options, followed by
/// [`GoogleAuth::credential`] so that a missing credential is reported right away.
pub async fn provider() -> Result<Arc<dyn TokenProvider>, Error> {
    let auth = GoogleAuth::new(GoogleAuthOptions::default())?;
    auth.credential().await?;
    Ok(Arc::new(auth))
}

/// A trait for an authentication context that can provide tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a valid token
    ///
    /// Tokens are cached and only refreshed once they are about to expire.
    async fn token(&self) -> Result<Arc<Token>, Error>;

    /// Get the project ID for the authentication context
    async fn project_id(&self) -> Result<Arc<str>, Error>;
}

/// Enumerates all possible errors returned by this library.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Credential JSON is malformed or lacks required fields
    #[error("invalid credential format: {0}")]
    InvalidCredentialFormat(&'static str, #[source] Option<serde_json::Error>),

    /// A named or well-known credential file could not be read
    #[error("unable to read credential file {0:?}")]
    CredentialFileUnreadable(PathBuf, #[source] std::io::Error),

    /// The compute environment probe failed with a non-recoverable error
    #[error("unexpected error while detecting the compute environment")]
    UnexpectedEnvironmentError(#[source] Box<Error>),

    /// No credential source produced a credential
    ///
    /// Application default credentials are resolved from explicit options, the
    /// `GOOGLE_APPLICATION_CREDENTIALS` environment variable, the well-known `gcloud` file
    /// and the GCE instance metadata server. None of these were available.
    #[error("could not load the default credentials")]
    NoCredentialsFound,

    /// No project ID source produced a project ID
    #[error("unable to detect a project ID in the current environment")]
    ProjectIdNotFound,

    /// Exchanging a grant for an access token failed
    #[error("failed to refresh access token")]
    TokenRefreshFailed(#[source] Box<Error>),

    /// Neither a local private key nor a delegated signing identity is available
    #[error("signing unavailable: {0}")]
    SigningUnavailable(&'static str),

    /// The host name of a request could not be resolved
    #[error("{0}: host not found")]
    HostNotFound(&'static str, #[source] Box<dyn std::error::Error + Send + Sync>),

    /// An HTTP request failed before a response was received
    #[error("{0}: {1}")]
    Transport(&'static str, #[source] Box<dyn std::error::Error + Send + Sync>),

    /// A server responded with a non-success status
    #[error("server responded with {0}: {1}")]
    Server(http::StatusCode, String),

    /// Failed to parse JSON
    #[error("{0}: {1}")]
    Json(&'static str, #[source] serde_json::Error),

    /// Other I/O error
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Str(&'static str),
}
