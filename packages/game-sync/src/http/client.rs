//! reqwest implementation of [`GameApi`] against the Nommie backend.

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Response, StatusCode};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{ProblemDetails, SyncError};
use crate::http::api::{GameApi, MutationRequest, SnapshotFetch, WsToken};
use crate::protocol::game_state::GameSnapshotResponse;

const TRACE_ID_HEADER: &str = "x-trace-id";

pub struct HttpGameApi {
    client: reqwest::Client,
    base_url: String,
    bearer: String,
    credential_timeout: std::time::Duration,
}

impl HttpGameApi {
    pub fn new(config: &SyncConfig, bearer: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bearer: bearer.into(),
            credential_timeout: config.credential_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn issue_ws_token(&self) -> Result<WsToken, SyncError> {
        let resp = self
            .client
            .post(self.url("/api/ws/token"))
            .bearer_auth(&self.bearer)
            .timeout(self.credential_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(match error_from_response(resp).await {
                SyncError::Http {
                    detail, trace_id, ..
                } => SyncError::Credential { detail, trace_id },
                other => other,
            });
        }

        Ok(resp.json::<WsToken>().await?)
    }

    async fn fetch_snapshot(
        &self,
        game_id: i64,
        if_none_match: Option<&str>,
    ) -> Result<SnapshotFetch, SyncError> {
        let mut req = self
            .client
            .get(self.url(&format!("/api/games/{game_id}/snapshot")))
            .bearer_auth(&self.bearer);
        if let Some(etag) = if_none_match {
            req = req.header(IF_NONE_MATCH, etag);
        }

        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            debug!(game_id, "snapshot not modified");
            return Ok(SnapshotFetch::NotModified);
        }
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let response = resp.json::<GameSnapshotResponse>().await?;

        Ok(SnapshotFetch::Modified { response, etag })
    }

    async fn submit(&self, game_id: i64, request: &MutationRequest) -> Result<(), SyncError> {
        let segment = request.action.kind().path_segment();
        let resp = self
            .client
            .post(self.url(&format!("/api/games/{game_id}/{segment}")))
            .bearer_auth(&self.bearer)
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(())
    }
}

async fn error_from_response(resp: Response) -> SyncError {
    let status = resp.status().as_u16();
    let header_trace_id = resp
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = resp.text().await.unwrap_or_default();
    let problem = serde_json::from_str::<ProblemDetails>(&body).unwrap_or_else(|_| ProblemDetails {
        type_: String::new(),
        title: String::new(),
        status,
        detail: if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body
        },
        code: format!("HTTP_{status}"),
        trace_id: None,
    });

    SyncError::from_problem(status, problem, header_trace_id)
}
