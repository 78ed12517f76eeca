//! Server transport used by the sync engine.

use async_trait::async_trait;
use santorini_engine::{
    CreateMatchRequest, ErrorBody, MatchId, MatchState, SubmissionOutcome, SubmitMoveRequest,
};
use tracing::{debug, instrument, warn};

use crate::error::TransportError;

/// Round trips to the authoritative match server.
#[async_trait]
pub trait MoveTransport: Send + Sync {
    /// Submits one move or undo decision.
    async fn submit(
        &self,
        match_id: &MatchId,
        request: &SubmitMoveRequest,
    ) -> Result<SubmissionOutcome, TransportError>;

    /// Fetches the latest authoritative state.
    async fn fetch_state(&self, match_id: &MatchId) -> Result<MatchState, TransportError>;
}

/// JSON-over-HTTP transport with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Opens a match owned by this transport's user.
    #[instrument(skip(self))]
    pub async fn create_match(
        &self,
        request: &CreateMatchRequest,
    ) -> Result<MatchState, TransportError> {
        let response = self
            .client
            .post(format!("{}/matches", self.base_url))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Takes the opponent seat of a waiting match.
    #[instrument(skip(self), fields(match_id = %match_id))]
    pub async fn join_match(&self, match_id: &MatchId) -> Result<MatchState, TransportError> {
        let response = self
            .client
            .post(format!("{}/matches/{}/join", self.base_url, match_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let body = response
            .json::<ErrorBody>()
            .await
            .map_err(|e| TransportError::Decode(format!("error body ({}): {}", status, e)))?;
        warn!(status = status.as_u16(), code = %body.code, "Server rejected request");
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MoveTransport for HttpTransport {
    #[instrument(skip(self, request), fields(match_id = %match_id))]
    async fn submit(
        &self,
        match_id: &MatchId,
        request: &SubmitMoveRequest,
    ) -> Result<SubmissionOutcome, TransportError> {
        debug!(?request, "Submitting");
        let response = self
            .client
            .post(format!("{}/matches/{}/moves", self.base_url, match_id))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self), fields(match_id = %match_id))]
    async fn fetch_state(&self, match_id: &MatchId) -> Result<MatchState, TransportError> {
        let response = self
            .client
            .get(format!("{}/matches/{}", self.base_url, match_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response).await
    }
}
