use std::future::Future;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Request;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, Level};

use crate::credential::{Credential, CredentialKind};
use crate::types::json_body;
use crate::Error;

/// Sign `payload` with RSA PKCS1 SHA256
///
/// Credentials that carry a private key sign locally. Compute credentials delegate to the
/// IAM `signBlob` API as the default service account; `project_id` is only awaited in that
/// case.
#[instrument(level = Level::DEBUG, skip_all, fields(kind = credential.describe()))]
pub(crate) async fn sign(
    credential: &Credential,
    project_id: impl Future<Output = Result<Arc<str>, Error>>,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let compute = match credential.kind() {
        CredentialKind::ServiceAccountKey(key) => {
            debug!("signing with local private key");
            return key.signer()?.sign(payload);
        }
        CredentialKind::ComputeMetadata(compute) => compute,
        _ => {
            return Err(Error::SigningUnavailable(
                "credential has neither a private key nor a delegated identity",
            ))
        }
    };

    let project_id = project_id.await?;
    let email = compute.email().await?;
    let token = credential.access_token().await?;

    let body = serde_json::to_vec(&SignBlobRequest {
        bytes_to_sign: STANDARD.encode(payload),
    })
    .map_err(|err| Error::Json("failed to serialize signBlob request", err))?;

    let request = Request::post(format!(
        "https://iam.googleapis.com/v1/projects/{project_id}/serviceAccounts/{email}:signBlob"
    ))
    .header(CONTENT_TYPE, "application/json")
    .header(AUTHORIZATION, format!("Bearer {}", token.as_str()))
    .body(Bytes::from(body))
    .map_err(|_| Error::Str("invalid signBlob request"))?;

    debug!(email, "signing with IAM signBlob");
    let response = compute.deps.http.fetch(request).await?;
    let response =
        json_body::<SignBlobResponse>(response, "failed to deserialize signBlob response")?;

    STANDARD
        .decode(response.signature)
        .map_err(|_| Error::Str("signBlob returned an invalid signature"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobRequest {
    bytes_to_sign: String,
}

#[derive(Deserialize)]
struct SignBlobResponse {
    signature: String,
}
