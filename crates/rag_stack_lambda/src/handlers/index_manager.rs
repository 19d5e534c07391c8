use rag_stack_core::vector_index::{
    is_valid_index_name, IndexAction, IndexOutcome, IndexRequest, IndexResponse,
};
use tracing::{info, warn};

use crate::adapters::search_index::{SearchIndexApi, SearchIndexReply};

const ALREADY_EXISTS_MARKER: &str = "resource_already_exists_exception";
const MAX_BODY_EXCERPT_CHARS: usize = 512;

pub fn handle_index_request(request: &IndexRequest, api: &dyn SearchIndexApi) -> IndexResponse {
    let spec = &request.spec;
    if !is_valid_index_name(&spec.index_name) {
        return IndexResponse::error(
            &spec.index_name,
            "index name is not a valid OpenSearch index name",
        );
    }
    if !spec.endpoint.starts_with("https://") {
        return IndexResponse::error(&spec.index_name, "collection endpoint must use https");
    }

    let url = spec.index_url();
    info!(
        action = ?request.action,
        index_name = %spec.index_name,
        url = %url,
        "index request received"
    );

    let response = match request.action {
        IndexAction::Create => {
            let body = spec.index_body().to_string();
            match api.put_index(&url, body.as_bytes()) {
                Ok(reply) => create_outcome(&spec.index_name, reply),
                Err(error) => {
                    IndexResponse::error(&spec.index_name, format!("PUT {url} failed: {error}"))
                }
            }
        }
        IndexAction::Delete => match api.delete_index(&url) {
            Ok(reply) => delete_outcome(&spec.index_name, reply),
            Err(error) => {
                IndexResponse::error(&spec.index_name, format!("DELETE {url} failed: {error}"))
            }
        },
    };

    if response.status.is_success() {
        info!(index_name = %spec.index_name, outcome = ?response.status, "index request completed");
    } else {
        warn!(
            index_name = %spec.index_name,
            http_status = ?response.http_status,
            message = ?response.message,
            "index request failed"
        );
    }
    response
}

fn create_outcome(index_name: &str, reply: SearchIndexReply) -> IndexResponse {
    if reply.is_success() {
        return IndexResponse::new(IndexOutcome::Created, index_name).with_http_status(reply.status);
    }
    if reply.status == 400 && reply.body.contains(ALREADY_EXISTS_MARKER) {
        return IndexResponse::new(IndexOutcome::AlreadyExists, index_name)
            .with_http_status(reply.status);
    }
    unexpected(index_name, reply)
}

fn delete_outcome(index_name: &str, reply: SearchIndexReply) -> IndexResponse {
    if reply.is_success() {
        return IndexResponse::new(IndexOutcome::Deleted, index_name).with_http_status(reply.status);
    }
    if reply.status == 404 {
        return IndexResponse::new(IndexOutcome::NotFound, index_name)
            .with_http_status(reply.status);
    }
    unexpected(index_name, reply)
}

fn unexpected(index_name: &str, reply: SearchIndexReply) -> IndexResponse {
    let excerpt: String = reply.body.chars().take(MAX_BODY_EXCERPT_CHARS).collect();
    IndexResponse::error(index_name, excerpt).with_http_status(reply.status)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rag_stack_core::lifecycle::ResourceProperties;
    use rag_stack_core::vector_index::{VectorIndexSpec, DEFAULT_VECTOR_FIELD};
    use serde_json::{json, Value};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        method: &'static str,
        url: String,
        body: Option<Value>,
    }

    struct ScriptedIndexApi {
        calls: Mutex<Vec<Call>>,
        reply: Result<SearchIndexReply, String>,
    }

    impl ScriptedIndexApi {
        fn replying(status: u16, body: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply: Ok(SearchIndexReply {
                    status,
                    body: body.to_string(),
                }),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().expect("poisoned mutex").clone()
        }
    }

    impl SearchIndexApi for ScriptedIndexApi {
        fn put_index(&self, url: &str, body: &[u8]) -> Result<SearchIndexReply, String> {
            self.calls.lock().expect("poisoned mutex").push(Call {
                method: "PUT",
                url: url.to_string(),
                body: Some(serde_json::from_slice(body).expect("body should be json")),
            });
            self.reply.clone()
        }

        fn delete_index(&self, url: &str) -> Result<SearchIndexReply, String> {
            self.calls.lock().expect("poisoned mutex").push(Call {
                method: "DELETE",
                url: url.to_string(),
                body: None,
            });
            self.reply.clone()
        }
    }

    fn request(action: IndexAction) -> IndexRequest {
        let properties: ResourceProperties = serde_json::from_value(json!({
            "CollectionName": "slack-rag-dev-vectors",
            "IndexName": "kb-index",
            "Endpoint": "https://abc123.us-east-1.aoss.amazonaws.com"
        }))
        .expect("properties should parse");
        IndexRequest {
            action,
            spec: VectorIndexSpec::from_properties(&properties).expect("spec should parse"),
        }
    }

    #[test]
    fn create_puts_the_knn_mapping() {
        let api = ScriptedIndexApi::replying(200, r#"{"acknowledged":true}"#);
        let response = handle_index_request(&request(IndexAction::Create), &api);

        assert_eq!(response.status, IndexOutcome::Created);
        let calls = api.calls();
        assert_eq!(calls[0].method, "PUT");
        assert_eq!(calls[0].url, "https://abc123.us-east-1.aoss.amazonaws.com/kb-index");
        let body = calls[0].body.as_ref().expect("create sends a body");
        assert_eq!(body["mappings"]["properties"][DEFAULT_VECTOR_FIELD]["type"], "knn_vector");
    }

    #[test]
    fn existing_index_is_an_idempotent_success() {
        let api = ScriptedIndexApi::replying(
            400,
            r#"{"error":{"type":"resource_already_exists_exception","reason":"index [kb-index] already exists"}}"#,
        );
        let response = handle_index_request(&request(IndexAction::Create), &api);

        assert_eq!(response.status, IndexOutcome::AlreadyExists);
        assert!(response.status.is_success());
    }

    #[test]
    fn other_bad_requests_are_errors_with_an_excerpt() {
        let long_body = format!(
            "{{\"error\":\"mapper_parsing_exception\",\"pad\":\"{}\"}}",
            "x".repeat(2000)
        );
        let api = ScriptedIndexApi::replying(400, &long_body);
        let response = handle_index_request(&request(IndexAction::Create), &api);

        assert_eq!(response.status, IndexOutcome::Error);
        assert_eq!(response.http_status, Some(400));
        let message = response.message.expect("error message");
        assert!(message.contains("mapper_parsing_exception"));
        assert_eq!(message.chars().count(), MAX_BODY_EXCERPT_CHARS);
    }

    #[test]
    fn deleting_a_missing_index_is_not_an_error() {
        let api = ScriptedIndexApi::replying(404, r#"{"error":"index_not_found_exception"}"#);
        let response = handle_index_request(&request(IndexAction::Delete), &api);

        assert_eq!(response.status, IndexOutcome::NotFound);
        assert!(response.status.is_success());
        assert_eq!(api.calls()[0].method, "DELETE");
    }

    #[test]
    fn transport_failure_is_reported_not_raised() {
        let api = ScriptedIndexApi {
            calls: Mutex::new(Vec::new()),
            reply: Err("connection reset".to_string()),
        };
        let response = handle_index_request(&request(IndexAction::Delete), &api);

        assert_eq!(response.status, IndexOutcome::Error);
        assert!(response
            .message
            .is_some_and(|message| message.contains("connection reset")));
    }

    #[test]
    fn invalid_index_name_never_reaches_the_collection() {
        let api = ScriptedIndexApi::replying(200, "{}");
        let mut bad = request(IndexAction::Create);
        bad.spec.index_name = "Has Spaces".to_string();

        let response = handle_index_request(&bad, &api);

        assert_eq!(response.status, IndexOutcome::Error);
        assert!(api.calls().is_empty());
    }
}
