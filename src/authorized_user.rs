use std::fmt;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::Request;
use tracing::{debug, instrument, Level};
use url::form_urlencoded;

use crate::collaborators::Collaborators;
use crate::service_account::DEFAULT_TOKEN_URI;
use crate::types::{json_body, Token, TokenResponse};
use crate::Error;

/// End-user credentials holding an OAuth2 refresh token
///
/// This is what `gcloud auth application-default login` writes to the well-known file.
pub struct AuthorizedUser {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) refresh_token: String,
    pub(crate) quota_project_id: Option<String>,
    pub(crate) token_uri: Option<String>,
    pub(crate) deps: Collaborators,
}

impl AuthorizedUser {
    /// The OAuth2 client ID the refresh token was issued to
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The project billed for quota, if set
    pub fn quota_project_id(&self) -> Option<&str> {
        self.quota_project_id.as_deref()
    }

    /// Whether these credentials were issued to the Cloud SDK itself
    pub fn is_cloud_sdk(&self) -> bool {
        self.client_id == CLOUD_SDK_CLIENT_ID
    }

    #[instrument(level = Level::DEBUG, skip(self), fields(client_id = %self.client_id))]
    pub(crate) async fn fetch_token(&self) -> Result<Token, Error> {
        let token_uri = self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .finish();

        let request = Request::post(token_uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from(body))
            .map_err(|_| Error::Str("invalid token URI in user credentials"))?;

        debug!(token_uri, "requesting token with refresh token");
        let now = self.deps.clock.now();
        let response = self.deps.http.fetch(request).await?;
        let token = json_body::<TokenResponse>(response, "failed to deserialize token response")?;
        token.into_token(now)
    }
}

impl fmt::Debug for AuthorizedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedUser")
            .field("client_id", &self.client_id)
            .field("quota_project_id", &self.quota_project_id)
            .finish_non_exhaustive()
    }
}

pub(crate) const CLOUD_SDK_CLIENT_ID: &str =
    "764086051850-6qr4p6gpi6hn506pt8ejuq83di341hur.apps.googleusercontent.com";
