//! Delivery of lifecycle responses.
//!
//! A raw CloudFormation custom resource expects the response as a PUT to the
//! pre-signed `ResponseURL`. The signature covers an empty content type, so
//! the header must be sent empty. Behind a provider framework there is no
//! URL and the Lambda return value is the response.

use rag_stack_core::lifecycle::{LifecycleEvent, LifecycleResponse};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode lifecycle response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to deliver lifecycle response: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response URL rejected lifecycle response with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

pub async fn deliver_response(
    client: &reqwest::Client,
    response_url: &str,
    response: &LifecycleResponse,
) -> Result<(), DeliveryError> {
    let body = serde_json::to_vec(response)?;
    let reply = client
        .put(response_url)
        .header(CONTENT_TYPE, "")
        .header(CONTENT_LENGTH, body.len())
        .body(body)
        .send()
        .await?;

    let status = reply.status();
    if !status.is_success() {
        let body = reply.text().await.unwrap_or_default();
        return Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

/// Delivers to the event's `ResponseURL` when there is one, then hands the
/// response back as the invocation result.
pub async fn respond(
    client: &reqwest::Client,
    event: &LifecycleEvent,
    response: LifecycleResponse,
) -> Result<LifecycleResponse, lambda_runtime::Error> {
    let Some(response_url) = event
        .response_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
    else {
        return Ok(response);
    };

    match deliver_response(client, response_url, &response).await {
        Ok(()) => {
            info!(
                status = ?response.status,
                physical_id = %response.physical_resource_id,
                "lifecycle response delivered"
            );
            Ok(response)
        }
        Err(delivery_error) => {
            error!(error = %delivery_error, "lifecycle response delivery failed");
            Err(lambda_runtime::Error::from(delivery_error.to_string()))
        }
    }
}
