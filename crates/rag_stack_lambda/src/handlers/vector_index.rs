use rag_stack_core::lifecycle::{LifecycleEvent, LifecycleResponse, RequestType, ResponseData};
use rag_stack_core::vector_index::{
    IndexAction, IndexRequest, IndexResponse, VectorIndexSpec, COLLECTION_NAME_PROPERTY,
    INDEX_NAME_PROPERTY,
};
use tracing::{info, warn};

use crate::adapters::invoke::IndexFunctionInvoker;
use crate::handlers::HandlerError;

pub fn handle_vector_index_event(
    event: &LifecycleEvent,
    invoker: &dyn IndexFunctionInvoker,
) -> LifecycleResponse {
    let spec = match VectorIndexSpec::from_properties(&event.resource_properties) {
        Ok(spec) => spec,
        // Create or Update with these properties already failed, so there is nothing to remove.
        Err(error) if event.request_type == RequestType::Delete => {
            warn!(error = %error, "delete with unusable properties, nothing to remove");
            let physical_id = event.physical_id_or(String::new);
            return LifecycleResponse::success(event, physical_id, ResponseData::new());
        }
        Err(error) => {
            warn!(
                request_type = %event.request_type,
                error = %error,
                "rejected vector index properties"
            );
            return LifecycleResponse::failed(event, event.physical_id_or(String::new), error);
        }
    };

    let (action, physical_id) = match event.request_type {
        RequestType::Create => (Some(IndexAction::Create), spec.physical_id()),
        RequestType::Delete => (
            Some(IndexAction::Delete),
            event.physical_id_or(|| spec.physical_id()),
        ),
        RequestType::Update => {
            if targets_new_index(event, &spec) {
                (Some(IndexAction::Create), spec.physical_id())
            } else {
                (None, event.physical_id_or(|| spec.physical_id()))
            }
        }
    };

    if let Some(action) = action {
        if let Err(error) = run_index_action(invoker, action, &spec) {
            warn!(
                request_type = %event.request_type,
                index_name = %spec.index_name,
                error = %error,
                "vector index request failed"
            );
            return LifecycleResponse::failed(event, physical_id, error);
        }
    } else {
        info!(index_name = %spec.index_name, "index target unchanged, update is a no-op");
    }

    let data = ResponseData::from([
        (INDEX_NAME_PROPERTY.to_string(), spec.index_name.clone()),
        (COLLECTION_NAME_PROPERTY.to_string(), spec.collection_name.clone()),
    ]);
    LifecycleResponse::success(event, physical_id, data)
}

/// An index lives at one name on one collection. Anything else about the
/// mapping cannot change in place, so such edits are left alone.
fn targets_new_index(event: &LifecycleEvent, spec: &VectorIndexSpec) -> bool {
    let Some(old_properties) = event.old_resource_properties.as_ref() else {
        return true;
    };
    match VectorIndexSpec::from_properties(old_properties) {
        Ok(old) => {
            if old.same_target(spec) && old != *spec {
                warn!(
                    index_name = %spec.index_name,
                    "index mapping changes need a new IndexName, keeping the existing index"
                );
            }
            !old.same_target(spec)
        }
        Err(_) => true,
    }
}

fn run_index_action(
    invoker: &dyn IndexFunctionInvoker,
    action: IndexAction,
    spec: &VectorIndexSpec,
) -> Result<IndexResponse, HandlerError> {
    let request = IndexRequest {
        action,
        spec: spec.clone(),
    };
    let payload = serde_json::to_vec(&request).map_err(HandlerError::Encode)?;
    let reply = invoker
        .invoke_index_function(&payload)
        .map_err(HandlerError::Invoke)?;
    let response: IndexResponse = serde_json::from_slice(&reply).map_err(HandlerError::Decode)?;

    if !response.status.is_success() {
        let mut message = response
            .message
            .clone()
            .unwrap_or_else(|| "no details returned".to_string());
        if let Some(http_status) = response.http_status {
            message = format!("HTTP {http_status}: {message}");
        }
        return Err(HandlerError::IndexOperation {
            index_name: response.index_name,
            message,
        });
    }

    info!(
        index_name = %response.index_name,
        outcome = ?response.status,
        "index function completed"
    );
    Ok(response)
}
