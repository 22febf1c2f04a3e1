use std::cell::RefCell;

use formats::Project;
use futures_util::FutureExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{BackendError, FeaturePage, FeatureQuery, LayerBackend, LocalBoxFuture};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// `LayerBackend` over the REST API.
///
/// Requests carry the access token as a bearer credential. A 401 triggers a
/// single token refresh followed by one retry of the original request.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    tokens: RefCell<AuthTokens>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, tokens: AuthTokens) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, tokens)
    }

    /// Uses a preconfigured client (timeouts, proxies, TLS roots).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: AuthTokens,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            tokens: RefCell::new(tokens),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current tokens, including any obtained through refresh.
    pub fn tokens(&self) -> AuthTokens {
        self.tokens.borrow().clone()
    }

    pub fn project_url(&self, project_id: &str) -> String {
        format!("{}/api/projects/{project_id}/config/", self.base_url)
    }

    pub fn features_url(&self, query: &FeatureQuery) -> String {
        format!(
            "{}/api/layers/{}/features/?bbox={}&zoom={}&chunk={}",
            self.base_url,
            query.layer_id,
            query.bbox.to_query_param(),
            query.zoom,
            query.chunk
        )
    }

    fn refresh_url(&self) -> String {
        format!("{}/api/auth/token/refresh/", self.base_url)
    }

    async fn send_get(&self, url: &str) -> Result<reqwest::Response, BackendError> {
        let access = self.tokens.borrow().access.clone();
        let mut req = self.client.get(url);
        if let Some(token) = access {
            req = req.bearer_auth(token);
        }
        req.send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))
    }

    /// Exchanges the refresh token for a new access token.
    async fn refresh(&self) -> Result<(), BackendError> {
        let Some(refresh) = self.tokens.borrow().refresh.clone() else {
            return Err(BackendError::Unauthorized);
        };

        let resp = self
            .client
            .post(self.refresh_url())
            .json(&RefreshRequest { refresh: &refresh })
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "token refresh rejected");
            return Err(BackendError::Unauthorized);
        }
        let body: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let mut tokens = self.tokens.borrow_mut();
        tokens.access = Some(body.access);
        if let Some(rotated) = body.refresh {
            tokens.refresh = Some(rotated);
        }
        debug!("access token refreshed");
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<Value, BackendError> {
        let mut resp = self.send_get(url).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            self.refresh().await?;
            resp = self.send_get(url).await?;
            if resp.status() == StatusCode::UNAUTHORIZED {
                return Err(BackendError::Unauthorized);
            }
        }
        if !resp.status().is_success() {
            return Err(BackendError::Status {
                code: resp.status().as_u16(),
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

impl LayerBackend for HttpBackend {
    fn fetch_project<'a>(&'a self, project_id: &'a str)
    -> LocalBoxFuture<'a, Result<Project, BackendError>> {
        async move {
            let value = self.get_json(&self.project_url(project_id)).await?;
            Project::from_json_value(&value).map_err(|e| BackendError::Decode(e.to_string()))
        }
        .boxed_local()
    }

    fn fetch_features<'a>(
        &'a self,
        query: &'a FeatureQuery,
    ) -> LocalBoxFuture<'a, Result<FeaturePage, BackendError>> {
        async move {
            let url = self.features_url(query);
            debug!(layer = %query.layer_id, chunk = query.chunk, "fetching features");
            let value = self.get_json(&url).await?;
            FeaturePage::from_response_value(&value)
        }
        .boxed_local()
    }
}
