//! `HttpInterviewService`: the recruiting platform's interview endpoints.
//!
//! ```text
//! POST {base}/api/interviews/{id}/validate   {accessToken}
//! POST {base}/api/interviews/{id}/stream     {action, accessToken, message?, integrityEvents?, transcript?}
//!                                            → text/event-stream
//! ```
//!
//! All connection details come from [`ServiceConfig`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;

use crate::config::ServiceConfig;

use super::wire::{ErrorBody, SseDecoder, StreamBody, ValidateBody, ValidateResponse};
use super::{
    AccessError, AccessValidator, InterviewService, InterviewStatus, ServiceError,
    SessionCredentials, SessionDescriptor, StreamEvent, TurnRequest, TurnStream,
};

pub struct HttpInterviewService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInterviewService {
    /// Build the service from config.
    ///
    /// A default client is used as a last resort if the builder fails.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, interview_id: &str, action: &str) -> String {
        format!("{}/api/interviews/{}/{}", self.base_url, interview_id, action)
    }
}

#[async_trait]
impl AccessValidator for HttpInterviewService {
    async fn validate(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<SessionDescriptor, AccessError> {
        if !credentials.is_well_formed() {
            return Err(AccessError::InvalidLink);
        }

        let url = self.endpoint(&credentials.interview_id, "validate");
        let response = self
            .client
            .post(&url)
            .json(&ValidateBody {
                access_token: &credentials.access_token,
            })
            .send()
            .await
            .map_err(|e| AccessError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: ValidateResponse = response
                .json()
                .await
                .map_err(|e| AccessError::ConnectionFailed(format!("unreadable response: {e}")))?;
            log::info!("service: validated interview {} ({:?})", body.id, body.status);
            return Ok(body.into_descriptor());
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        classify_rejection(status, body, &credentials.interview_id)
    }
}

/// Map a non-success validation response onto the room's outcomes.
///
/// An interview that is already completed is reported by the service as a
/// 400 carrying its status; that is a valid descriptor, not a failure.
fn classify_rejection(
    status: StatusCode,
    body: ErrorBody,
    interview_id: &str,
) -> Result<SessionDescriptor, AccessError> {
    log::warn!("service: validation rejected ({status}): {:?}", body.error);

    match (status.as_u16(), body.status) {
        (400, Some(InterviewStatus::Completed)) => {
            Ok(SessionDescriptor::completed(interview_id))
        }
        (400, Some(InterviewStatus::Cancelled | InterviewStatus::Expired)) => {
            Err(AccessError::AccessDenied(
                body.error
                    .unwrap_or_else(|| "Interview is no longer available".into()),
            ))
        }
        (400 | 404, _) => Err(AccessError::InvalidLink),
        (401 | 403, _) => Err(AccessError::AccessDenied(
            body.error.unwrap_or_else(|| "Invalid access token".into()),
        )),
        _ => Err(AccessError::ConnectionFailed(format!(
            "server returned {status}"
        ))),
    }
}

#[async_trait]
impl InterviewService for HttpInterviewService {
    async fn open_turn(
        &self,
        credentials: &SessionCredentials,
        request: TurnRequest,
    ) -> Result<TurnStream, ServiceError> {
        let url = self.endpoint(&credentials.interview_id, "stream");
        log::debug!("service: {} turn for {}", request.action(), credentials.interview_id);

        let response = self
            .client
            .post(&url)
            .json(&StreamBody::new(credentials, &request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message: body
                    .error
                    .unwrap_or_else(|| format!("Request failed ({})", status.as_u16())),
            });
        }

        let mut decoder = SseDecoder::new();
        let events = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<StreamEvent, ServiceError>> {
                match chunk {
                    Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(ServiceError::from(e))],
                }
            })
            .flat_map(futures::stream::iter);

        Ok(events.boxed())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
