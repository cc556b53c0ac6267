//! GCE instance metadata server access and the compute environment probe
//!
//! See https://cloud.google.com/compute/docs/metadata/predefined-metadata-keys for details.

use bytes::Bytes;
use http::{Method, Request, Response};
use tracing::{debug, instrument, warn, Level};

use crate::collaborators::{Env, HttpFetcher};
use crate::Error;

/// Build a GET request for `path` below the metadata root
///
/// Every metadata request carries the `Metadata-Flavor: Google` header; the server rejects
/// requests without it.
pub(crate) fn request(env: &dyn Env, path: &str) -> Result<Request<Bytes>, Error> {
    let host = env
        .var(METADATA_HOST_ENV)
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_owned());

    Request::builder()
        .method(Method::GET)
        .uri(format!("http://{host}/computeMetadata/v1/{path}"))
        .header(METADATA_FLAVOR, "Google")
        .body(Bytes::new())
        .map_err(|_| Error::Str("invalid metadata server request"))
}

/// Send a GET for `path` to the metadata server
pub(crate) async fn get(
    http: &dyn HttpFetcher,
    env: &dyn Env,
    path: &str,
) -> Result<Response<Bytes>, Error> {
    debug!(path, "querying GCP instance metadata server");
    http.fetch(request(env, path)?).await
}

/// Determine whether the process runs inside the GCE compute environment
///
/// A response of 200 from the instance root confirms the environment. A host that does
/// not resolve means the metadata server is absent, so the probe answers `false` without
/// retrying. A 5xx response is retried once with a fresh request. Any other outcome is an
/// error and must not be cached by the caller.
#[instrument(level = Level::DEBUG, skip_all)]
pub(crate) async fn probe(http: &dyn HttpFetcher, env: &dyn Env) -> Result<bool, Error> {
    let mut retried = false;
    loop {
        let response = match get(http, env, INSTANCE_PATH).await {
            Ok(response) => response,
            Err(Error::HostNotFound(..)) if !retried => {
                debug!("metadata server host not found, not running on GCE");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let status = response.status();
        if status.is_success() {
            debug!("metadata server responded, running on GCE");
            return Ok(true);
        }

        if status.is_server_error() && !retried {
            warn!(%status, "metadata server unavailable, trying again...");
            retried = true;
            continue;
        }

        let body = String::from_utf8_lossy(response.body()).into_owned();
        return Err(Error::Server(status, body));
    }
}

pub(crate) const INSTANCE_PATH: &str = "instance";
pub(crate) const SERVICE_ACCOUNTS_PATH: &str = "instance/service-accounts/?recursive=true";
pub(crate) const TOKEN_PATH: &str = "instance/service-accounts/default/token";
pub(crate) const PROJECT_ID_PATH: &str = "project/project-id";

const METADATA_FLAVOR: &str = "Metadata-Flavor";
const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
