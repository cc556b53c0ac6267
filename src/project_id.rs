use std::future::Future;

use tracing::{debug, instrument, Level};

use crate::collaborators::Collaborators;
use crate::credential_source;
use crate::google_auth::GoogleAuthOptions;
use crate::metadata;
use crate::types::check_status;
use crate::Error;

/// Resolve the active project ID
///
/// In order: the project ID from `options`, the `GCLOUD_PROJECT` and `GOOGLE_CLOUD_PROJECT`
/// environment variables, the first credentials file found, the active `gcloud`
/// configuration and the metadata server. The metadata server is only queried if
/// `is_compute` confirms that we're running on GCE.
#[instrument(level = Level::DEBUG, skip_all)]
pub(crate) async fn resolve(
    options: &GoogleAuthOptions,
    deps: &Collaborators,
    is_compute: impl Future<Output = Result<bool, Error>>,
) -> Result<String, Error> {
    if let Some(project_id) = &options.project_id {
        debug!("using project ID from options");
        return Ok(project_id.clone());
    }

    for var in [PRIMARY_VAR, ALTERNATE_VAR] {
        if let Some(project_id) = deps.env.var(var).filter(|id| !id.is_empty()) {
            debug!(var, "using project ID from environment");
            return Ok(project_id);
        }
    }

    if let Some(project_id) = credential_source::file_project_id(options, deps).await? {
        debug!("using project ID from credentials file");
        return Ok(project_id);
    }

    if let Some(project_id) = from_gcloud(deps).await {
        debug!("using project ID from gcloud configuration");
        return Ok(project_id);
    }

    if is_compute.await? {
        debug!("getting project ID from GCP instance metadata server");
        let response = metadata::get(
            deps.http.as_ref(),
            deps.env.as_ref(),
            metadata::PROJECT_ID_PATH,
        )
        .await?;

        let body = check_status(response)?;
        let project_id = String::from_utf8_lossy(&body).trim().to_owned();
        if !project_id.is_empty() {
            return Ok(project_id);
        }
    }

    Err(Error::ProjectIdNotFound)
}

/// Read `core.project` from the active `gcloud` configuration
///
/// Any failure to run `gcloud` or to find the project in its output is treated as absent.
async fn from_gcloud(deps: &Collaborators) -> Option<String> {
    let output = match deps.commands.run(GCLOUD_CMD, &GCLOUD_ARGS).await {
        Ok(output) if output.success => output,
        Ok(_) => {
            debug!("gcloud config-helper exited with an error");
            return None;
        }
        Err(err) => {
            debug!(%err, "failed to run gcloud");
            return None;
        }
    };

    let config = serde_json::from_slice::<serde_json::Value>(&output.stdout).ok()?;
    config
        .pointer("/configuration/properties/core/project")
        .and_then(|project| project.as_str())
        .filter(|project| !project.is_empty())
        .map(str::to_owned)
}

const PRIMARY_VAR: &str = "GCLOUD_PROJECT";
const ALTERNATE_VAR: &str = "GOOGLE_CLOUD_PROJECT";

const GCLOUD_CMD: &str = if cfg!(windows) { "gcloud.cmd" } else { "gcloud" };
const GCLOUD_ARGS: [&str; 4] = ["config", "config-helper", "--format", "json"];
