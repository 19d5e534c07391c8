//! Vector index contract shared by the `VectorIndex` custom resource and the
//! index manager function it invokes.
//!
//! The knowledge base expects a fixed schema: one `knn_vector` field plus the
//! text fields Bedrock writes chunk text and metadata into. The field names
//! here must match the knowledge base's field mapping in [`crate::stack`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::lifecycle::{
    optional_str, optional_u64, required_str, PropertyError, ResourceProperties,
};
use crate::naming::physical_id_for_index;

pub const DEFAULT_DIMENSIONS: u64 = 1024;
pub const MAX_DIMENSIONS: u64 = 16_000;
pub const DEFAULT_VECTOR_FIELD: &str = "bedrock-knowledge-base-default-vector";
pub const DEFAULT_TEXT_FIELD: &str = "AMAZON_BEDROCK_TEXT_CHUNK";
pub const DEFAULT_METADATA_FIELD: &str = "AMAZON_BEDROCK_METADATA";
pub const SOURCE_URI_FIELD: &str = "x-amz-bedrock-kb-source-uri";
pub const DATA_SOURCE_ID_FIELD: &str = "x-amz-bedrock-kb-data-source-id";

pub const COLLECTION_NAME_PROPERTY: &str = "CollectionName";
pub const INDEX_NAME_PROPERTY: &str = "IndexName";
pub const ENDPOINT_PROPERTY: &str = "Endpoint";
pub const DIMENSIONS_PROPERTY: &str = "Dimensions";
pub const VECTOR_FIELD_PROPERTY: &str = "VectorField";
pub const TEXT_FIELD_PROPERTY: &str = "TextField";
pub const METADATA_FIELD_PROPERTY: &str = "MetadataField";

const EF_SEARCH: u64 = 512;
const EF_CONSTRUCTION: u64 = 512;
const HNSW_M: u64 = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexSpec {
    pub collection_name: String,
    pub index_name: String,
    pub endpoint: String,
    pub dimensions: u64,
    pub vector_field: String,
    pub text_field: String,
    pub metadata_field: String,
}

impl VectorIndexSpec {
    pub fn from_properties(properties: &ResourceProperties) -> Result<Self, PropertyError> {
        let collection_name = required_str(properties, COLLECTION_NAME_PROPERTY)?.to_string();
        let index_name = required_str(properties, INDEX_NAME_PROPERTY)?.to_string();
        validate_index_name(&index_name)?;

        let endpoint = required_str(properties, ENDPOINT_PROPERTY)?
            .trim_end_matches('/')
            .to_string();
        if !endpoint.starts_with("https://") {
            return Err(PropertyError::Invalid {
                key: ENDPOINT_PROPERTY.to_string(),
                expected: "an https:// collection endpoint",
                actual: endpoint,
            });
        }

        let dimensions =
            optional_u64(properties, DIMENSIONS_PROPERTY)?.unwrap_or(DEFAULT_DIMENSIONS);
        if dimensions == 0 || dimensions > MAX_DIMENSIONS {
            return Err(PropertyError::OutOfRange {
                key: DIMENSIONS_PROPERTY.to_string(),
                min: 1,
                max: MAX_DIMENSIONS,
                value: dimensions,
            });
        }

        Ok(Self {
            collection_name,
            index_name,
            endpoint,
            dimensions,
            vector_field: field_or(properties, VECTOR_FIELD_PROPERTY, DEFAULT_VECTOR_FIELD)?,
            text_field: field_or(properties, TEXT_FIELD_PROPERTY, DEFAULT_TEXT_FIELD)?,
            metadata_field: field_or(properties, METADATA_FIELD_PROPERTY, DEFAULT_METADATA_FIELD)?,
        })
    }

    pub fn physical_id(&self) -> String {
        physical_id_for_index(&self.index_name)
    }

    /// True when both specs address the same index on the same collection.
    pub fn same_target(&self, other: &Self) -> bool {
        self.collection_name == other.collection_name
            && self.index_name == other.index_name
            && self.endpoint == other.endpoint
    }

    pub fn index_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.index_name)
    }

    pub fn index_body(&self) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.vector_field.clone(),
            json!({
                "type": "knn_vector",
                "dimension": self.dimensions,
                "method": {
                    "name": "hnsw",
                    "engine": "faiss",
                    "space_type": "l2",
                    "parameters": {
                        "ef_construction": EF_CONSTRUCTION,
                        "m": HNSW_M,
                    },
                },
            }),
        );
        properties.insert(self.text_field.clone(), json!({"type": "text"}));
        properties.insert(
            self.metadata_field.clone(),
            json!({"type": "text", "index": false}),
        );
        properties.insert(SOURCE_URI_FIELD.to_string(), json!({"type": "text"}));
        properties.insert(DATA_SOURCE_ID_FIELD.to_string(), json!({"type": "text"}));

        json!({
            "settings": {
                "index": {
                    "knn": true,
                    "knn.algo_param.ef_search": EF_SEARCH,
                },
            },
            "mappings": {
                "properties": Value::Object(properties),
            },
        })
    }
}

fn field_or(
    properties: &ResourceProperties,
    key: &str,
    default: &str,
) -> Result<String, PropertyError> {
    Ok(optional_str(properties, key)?.unwrap_or(default).to_string())
}

pub fn is_valid_index_name(name: &str) -> bool {
    let starts_badly = name.is_empty() || name.starts_with(['_', '-', '+']);
    let has_forbidden = name.chars().any(|ch| {
        ch.is_ascii_uppercase()
            || ch.is_whitespace()
            || matches!(ch, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ',' | '#' | ':')
    });
    !starts_badly && !has_forbidden && name.len() <= 255
}

fn validate_index_name(name: &str) -> Result<(), PropertyError> {
    if is_valid_index_name(name) {
        return Ok(());
    }
    Err(PropertyError::Invalid {
        key: INDEX_NAME_PROPERTY.to_string(),
        expected: "a lowercase OpenSearch index name",
        actual: name.to_string(),
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexAction {
    Create,
    Delete,
}

/// Payload of the synchronous call into the index manager function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub action: IndexAction,
    #[serde(flatten)]
    pub spec: VectorIndexSpec,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    AlreadyExists,
    Deleted,
    NotFound,
    Error,
}

impl IndexOutcome {
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexResponse {
    pub status: IndexOutcome,
    pub index_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IndexResponse {
    pub fn new(status: IndexOutcome, index_name: impl Into<String>) -> Self {
        Self {
            status,
            index_name: index_name.into(),
            http_status: None,
            message: None,
        }
    }

    pub fn error(index_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: IndexOutcome::Error,
            index_name: index_name.into(),
            http_status: None,
            message: Some(message.into()),
        }
    }

    pub fn with_http_status(mut self, http_status: u16) -> Self {
        self.http_status = Some(http_status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(value: Value) -> ResourceProperties {
        serde_json::from_value(value).expect("properties should parse")
    }

    fn base_properties() -> ResourceProperties {
        properties(json!({
            "CollectionName": "slack-rag-dev",
            "IndexName": "bedrock-knowledge-base-default-index",
            "Endpoint": "https://abc123.us-east-1.aoss.amazonaws.com/",
            "Dimensions": "1024"
        }))
    }

    #[test]
    fn parses_properties_with_bedrock_defaults() {
        let spec = VectorIndexSpec::from_properties(&base_properties()).expect("spec should parse");

        assert_eq!(spec.endpoint, "https://abc123.us-east-1.aoss.amazonaws.com");
        assert_eq!(spec.dimensions, 1024);
        assert_eq!(spec.vector_field, DEFAULT_VECTOR_FIELD);
        assert_eq!(
            spec.index_url(),
            "https://abc123.us-east-1.aoss.amazonaws.com/bedrock-knowledge-base-default-index"
        );
    }

    #[test]
    fn index_body_declares_vector_and_text_fields() {
        let spec = VectorIndexSpec::from_properties(&base_properties()).expect("spec should parse");
        let body = spec.index_body();

        let fields = &body["mappings"]["properties"];
        assert_eq!(fields[DEFAULT_VECTOR_FIELD]["type"], "knn_vector");
        assert_eq!(fields[DEFAULT_VECTOR_FIELD]["dimension"], 1024);
        assert_eq!(fields[DEFAULT_VECTOR_FIELD]["method"]["engine"], "faiss");
        assert_eq!(fields[DEFAULT_TEXT_FIELD]["type"], "text");
        assert_eq!(fields[DEFAULT_METADATA_FIELD]["index"], false);
        assert_eq!(fields[SOURCE_URI_FIELD]["type"], "text");
        assert_eq!(body["settings"]["index"]["knn"], true);
    }

    #[test]
    fn rejects_uppercase_index_name_and_plain_http_endpoint() {
        let mut uppercase = base_properties();
        uppercase.insert("IndexName".to_string(), json!("MyIndex"));
        assert!(VectorIndexSpec::from_properties(&uppercase).is_err());

        let mut insecure = base_properties();
        insecure.insert("Endpoint".to_string(), json!("http://localhost:9200"));
        let error = VectorIndexSpec::from_properties(&insecure).expect_err("http should fail");
        assert!(error.to_string().contains("Endpoint"));
    }

    #[test]
    fn physical_id_depends_only_on_index_name() {
        let first =
            VectorIndexSpec::from_properties(&base_properties()).expect("spec should parse");
        let mut other_endpoint = base_properties();
        other_endpoint.insert(
            "Endpoint".to_string(),
            json!("https://other.us-east-1.aoss.amazonaws.com"),
        );
        let second =
            VectorIndexSpec::from_properties(&other_endpoint).expect("spec should parse");

        assert_eq!(first.physical_id(), second.physical_id());
        assert!(!first.same_target(&second));
    }

    #[test]
    fn index_request_flattens_spec_on_the_wire() {
        let spec = VectorIndexSpec::from_properties(&base_properties()).expect("spec should parse");
        let request = IndexRequest {
            action: IndexAction::Delete,
            spec,
        };

        let value = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(value["action"], "delete");
        assert_eq!(value["indexName"], "bedrock-knowledge-base-default-index");
        assert_eq!(value["collectionName"], "slack-rag-dev");
    }
}
