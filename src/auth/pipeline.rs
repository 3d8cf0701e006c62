//! Usage: Authenticated request pipeline (bearer attach, one refresh-and-replay on 401).

use crate::auth::coordinator::RefreshCoordinator;
use crate::auth::credentials::server_message;
use crate::auth::endpoints;
use crate::infra::token_store::{get_or_none, TokenStore, ACCESS_TOKEN_KEY};
use crate::shared::error::{AppError, AppResult, ErrorKind};
use crate::shared::security::mask_optional_token;
use bytes::Bytes;
use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Set once the request has been through the refresh path.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            AppError::new(ErrorKind::Internal, format!("response json invalid: {e}")).with_source(e)
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_base_url: String,
    store: Arc<dyn TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_base_url", &self.api_base_url)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        api_base_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            api_base_url: api_base_url.into(),
            store,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Sends `request`; a 401 on a non-credential route is refreshed and replayed at most once.
    pub async fn send(&self, mut request: ApiRequest) -> AppResult<ApiResponse> {
        let token = get_or_none(self.store.as_ref(), ACCESS_TOKEN_KEY)
            .await
            .filter(|v| !v.is_empty());
        let response = self.dispatch(&request, token.as_deref()).await?;

        if response.status != 401 || request.retried || endpoints::is_credential_route(&request.path)
        {
            return into_result(&request, response);
        }

        request.retried = true;
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            sent_with = %mask_optional_token(token.as_deref()),
            "401 received; waiting for token refresh"
        );
        let fresh = self.coordinator.handle_unauthorized(token.as_deref()).await?;
        let replayed = self.dispatch(&request, Some(&fresh)).await?;
        into_result(&request, replayed)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> AppResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.send(ApiRequest::post(path, body)).await?.json()
    }

    async fn dispatch(&self, request: &ApiRequest, bearer: Option<&str>) -> AppResult<ApiResponse> {
        let url = endpoints::join(&self.api_base_url, &request.path)?;
        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(ApiResponse { status, body })
    }
}

fn into_result(request: &ApiRequest, response: ApiResponse) -> AppResult<ApiResponse> {
    if (200..300).contains(&response.status) {
        return Ok(response);
    }

    let text = response.text();
    let message = server_message(&text).unwrap_or_else(|| {
        format!(
            "{} {} failed with status {}",
            request.method, request.path, response.status
        )
    });
    tracing::debug!(
        method = %request.method,
        path = %request.path,
        status = response.status,
        retried = request.retried,
        "request failed"
    );
    Err(AppError::new(ErrorKind::Http, message).with_status(response.status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static str) -> ApiResponse {
        ApiResponse {
            status,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn request_builders_start_unretried() {
        let request = ApiRequest::get("boards").with_query("page", "2");
        assert_eq!(request.method, Method::GET);
        assert!(!request.retried);
        assert_eq!(request.query, vec![("page".to_string(), "2".to_string())]);

        let request = ApiRequest::post("users/send-magic-link", serde_json::json!({"email": "a@b.c"}));
        assert_eq!(request.method, Method::POST);
        assert!(request.body.is_some());
    }

    #[test]
    fn success_statuses_pass_through() {
        let request = ApiRequest::get("users/me");
        let ok = into_result(&request, response(204, "")).unwrap();
        assert_eq!(ok.status, 204);
    }

    #[test]
    fn failures_carry_status_and_server_message() {
        let request = ApiRequest::get("users/me");
        let err = into_result(&request, response(403, r#"{"message":"Forbidden resource"}"#))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http);
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.message(), "Forbidden resource");

        let err = into_result(&request, response(502, "bad gateway")).unwrap_err();
        assert_eq!(err.message(), "GET users/me failed with status 502");
    }

    #[test]
    fn response_json_decodes_body() {
        let value: Value = response(200, r#"{"id":"u1"}"#).json().unwrap();
        assert_eq!(value["id"], "u1");
        assert!(response(200, "nope").json::<Value>().is_err());
    }
}
