use std::collections::HashMap;

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, Level};

use crate::collaborators::Collaborators;
use crate::metadata;
use crate::types::{json_body, Token, TokenResponse};
use crate::Error;

/// The default service account of a GCE instance
///
/// Holds no secret; tokens and the account's identity are requested from the instance
/// metadata server.
#[derive(Debug)]
pub struct ComputeMetadata {
    pub(crate) scopes: Vec<String>,
    pub(crate) deps: Collaborators,
    email: OnceCell<String>,
}

impl ComputeMetadata {
    pub(crate) fn new(scopes: Vec<String>, deps: Collaborators) -> Self {
        Self {
            scopes,
            deps,
            email: OnceCell::new(),
        }
    }

    /// Look up the email of the default service account
    ///
    /// The recursive service-accounts listing is fetched once per credential.
    pub async fn email(&self) -> Result<&str, Error> {
        let email = self
            .email
            .get_or_try_init(|| async {
                debug!("getting service account email from GCP instance metadata server");
                let response = metadata::get(
                    self.deps.http.as_ref(),
                    self.deps.env.as_ref(),
                    metadata::SERVICE_ACCOUNTS_PATH,
                )
                .await?;

                let mut accounts = json_body::<HashMap<String, ServiceAccountInfo>>(
                    response,
                    "failed to deserialize service accounts listing",
                )?;

                accounts
                    .remove("default")
                    .and_then(|account| account.email)
                    .ok_or(Error::SigningUnavailable(
                        "no default service account email on the metadata server",
                    ))
            })
            .await?;

        Ok(email.as_str())
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    pub(crate) async fn fetch_token(&self) -> Result<Token, Error> {
        let path = if self.scopes.is_empty() {
            metadata::TOKEN_PATH.to_owned()
        } else {
            format!("{}?scopes={}", metadata::TOKEN_PATH, self.scopes.join(","))
        };

        let now = self.deps.clock.now();
        let response =
            metadata::get(self.deps.http.as_ref(), self.deps.env.as_ref(), &path).await?;
        let token = json_body::<TokenResponse>(response, "failed to deserialize token response")?;
        token.into_token(now)
    }
}

#[derive(Deserialize)]
struct ServiceAccountInfo {
    email: Option<String>,
}
