use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tracing::{debug, instrument, warn, Level};

use crate::authorized_user::AuthorizedUser;
use crate::collaborators::{Collaborators, Env};
use crate::credential::{ApiKey, Credential, CredentialKind};
use crate::google_auth::GoogleAuthOptions;
use crate::metadata_service_account::ComputeMetadata;
use crate::service_account::ServiceAccountKey;
use crate::Error;

/// Resolve the application default credential
///
/// Sources are tried in order and the first one present wins: the API key and credential
/// JSON from `options`, the key file from `options`, the file named by
/// `GOOGLE_APPLICATION_CREDENTIALS`, the well-known `gcloud` file and finally the metadata
/// server, if `is_compute` confirms that we're running on GCE. `is_compute` is only polled
/// when every file source declined.
#[instrument(level = Level::DEBUG, skip_all)]
pub(crate) async fn resolve(
    options: &GoogleAuthOptions,
    deps: &Collaborators,
    is_compute: impl Future<Output = Result<bool, Error>>,
) -> Result<Credential, Error> {
    let threshold = options.eager_refresh_threshold;
    if let Some(key) = &options.api_key {
        debug!("using API key from options");
        return Ok(Credential::new(
            CredentialKind::ApiKey(ApiKey::new(key.clone())),
            threshold,
        ));
    }

    if let Some((file, source)) = find_file(options, deps).await? {
        debug!(?source, "using credentials file");
        let kind = file.into_kind(options, deps)?;
        if let (Source::WellKnown, CredentialKind::UserRefreshToken(user)) = (source, &kind) {
            if user.is_cloud_sdk() {
                warn_cloud_sdk_credentials(&CLOUD_SDK_WARNED);
            }
        }

        return Ok(Credential::new(kind, threshold));
    }

    debug!("no credentials file found, checking for GCE metadata server");
    match is_compute.await {
        Ok(true) => Ok(Credential::new(
            CredentialKind::ComputeMetadata(ComputeMetadata::new(
                options.scopes.clone(),
                deps.clone(),
            )),
            threshold,
        )),
        Ok(false) => Err(Error::NoCredentialsFound),
        Err(err) => Err(Error::UnexpectedEnvironmentError(Box::new(err))),
    }
}

/// The project ID embedded in the first credentials file found, if any
///
/// Only the file sources are consulted; the metadata server is not probed.
pub(crate) async fn file_project_id(
    options: &GoogleAuthOptions,
    deps: &Collaborators,
) -> Result<Option<String>, Error> {
    let Some((file, _)) = find_file(options, deps).await? else {
        return Ok(None);
    };

    Ok(match file.kind.as_deref() {
        Some(AUTHORIZED_USER) => file.quota_project_id,
        _ => file.project_id,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Explicit,
    KeyFile,
    EnvVar,
    WellKnown,
}

async fn find_file(
    options: &GoogleAuthOptions,
    deps: &Collaborators,
) -> Result<Option<(CredentialFile, Source)>, Error> {
    if let Some(json) = &options.credentials {
        let file = CredentialFile::deserialize(json).map_err(|err| {
            Error::InvalidCredentialFormat("failed to parse credentials", Some(err))
        })?;
        return Ok(Some((file, Source::Explicit)));
    }

    if let Some(path) = &options.key_filename {
        return Ok(Some((read_file(path, deps).await?, Source::KeyFile)));
    }

    if let Some(path) = env_credentials_path(deps.env.as_ref()) {
        return Ok(Some((read_file(&path, deps).await?, Source::EnvVar)));
    }

    let Some(path) = well_known_file(deps.env.as_ref()) else {
        debug!("no home directory to look for the well-known file in");
        return Ok(None);
    };

    if !deps.files.exists(&path).await {
        debug!(path = %path.display(), "well-known file not found");
        return Ok(None);
    }

    Ok(Some((read_file(&path, deps).await?, Source::WellKnown)))
}

async fn read_file(path: &Path, deps: &Collaborators) -> Result<CredentialFile, Error> {
    debug!(path = %path.display(), "reading credentials file");
    let contents = deps
        .files
        .read_to_string(path)
        .await
        .map_err(|err| Error::CredentialFileUnreadable(path.to_owned(), err))?;

    serde_json::from_str(&contents)
        .map_err(|err| Error::InvalidCredentialFormat("failed to parse credentials file", Some(err)))
}

fn env_credentials_path(env: &dyn Env) -> Option<PathBuf> {
    [CREDENTIALS_VAR, "google_application_credentials"]
        .into_iter()
        .filter_map(|key| env.var(key))
        .find(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// `%APPDATA%\gcloud\...` on Windows and `$HOME/.config/gcloud/...` elsewhere
fn well_known_file(env: &dyn Env) -> Option<PathBuf> {
    let mut path = if cfg!(windows) {
        PathBuf::from(env.var("APPDATA").filter(|dir| !dir.is_empty())?)
    } else {
        let mut home = PathBuf::from(env.var("HOME").filter(|dir| !dir.is_empty())?);
        home.push(".config");
        home
    };

    path.push("gcloud");
    path.push("application_default_credentials.json");
    Some(path)
}

/// Set once the Cloud SDK advisory has been logged; lives until the process exits
static CLOUD_SDK_WARNED: AtomicBool = AtomicBool::new(false);

/// Warn that end-user credentials are in use, unless `warned` is already set
fn warn_cloud_sdk_credentials(warned: &AtomicBool) {
    if !warned.swap(true, Ordering::Relaxed) {
        warn!(
            "Your application has authenticated using end user credentials from the Google \
             Cloud SDK. We recommend that most server applications use service accounts \
             instead. If your application continues to use end user credentials from the \
             Cloud SDK, you might receive a \"quota exceeded\" or \"API not enabled\" error."
        );
    }
}

/// The union of the fields of every supported credentials file
#[derive(Deserialize)]
struct CredentialFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    private_key_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    project_id: Option<String>,
    quota_project_id: Option<String>,
    token_uri: Option<String>,
}

impl CredentialFile {
    fn into_kind(
        self,
        options: &GoogleAuthOptions,
        deps: &Collaborators,
    ) -> Result<CredentialKind, Error> {
        match self.kind.as_deref() {
            None | Some(SERVICE_ACCOUNT) => {
                let (Some(client_email), Some(private_key)) = (self.client_email, self.private_key)
                else {
                    return Err(Error::InvalidCredentialFormat(
                        "service account credentials require client_email and private_key",
                        None,
                    ));
                };

                Ok(CredentialKind::ServiceAccountKey(ServiceAccountKey {
                    client_email,
                    private_key,
                    private_key_id: self.private_key_id,
                    client_id: self.client_id,
                    project_id: self.project_id,
                    token_uri: self.token_uri,
                    subject: options.subject.clone(),
                    scopes: options.scopes.clone(),
                    deps: deps.clone(),
                }))
            }
            Some(AUTHORIZED_USER) => {
                let (Some(client_id), Some(client_secret), Some(refresh_token)) =
                    (self.client_id, self.client_secret, self.refresh_token)
                else {
                    return Err(Error::InvalidCredentialFormat(
                        "user credentials require client_id, client_secret and refresh_token",
                        None,
                    ));
                };

                Ok(CredentialKind::UserRefreshToken(AuthorizedUser {
                    client_id,
                    client_secret,
                    refresh_token,
                    quota_project_id: self.quota_project_id,
                    token_uri: self.token_uri,
                    deps: deps.clone(),
                }))
            }
            Some(_) => Err(Error::InvalidCredentialFormat(
                "unsupported credential type",
                None,
            )),
        }
    }
}

pub(crate) const CREDENTIALS_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const SERVICE_ACCOUNT: &str = "service_account";
const AUTHORIZED_USER: &str = "authorized_user";
