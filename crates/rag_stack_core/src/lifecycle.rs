use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Key under which a failed response reports its error text.
pub const DATA_ERROR_KEY: &str = "Error";

pub type ResourceProperties = BTreeMap<String, Value>;
pub type ResponseData = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// A single custom-resource lifecycle event.
///
/// Accepts both the raw CloudFormation envelope (with `ResponseURL`) and the
/// reduced payload the provider framework hands to its `onEvent` function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    pub request_type: RequestType,
    #[serde(default)]
    pub resource_properties: ResourceProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<ResourceProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(rename = "ResponseURL", default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
}

impl LifecycleEvent {
    pub fn new(request_type: RequestType, resource_properties: ResourceProperties) -> Self {
        Self {
            request_type,
            resource_properties,
            old_resource_properties: None,
            physical_resource_id: None,
            response_url: None,
            stack_id: None,
            request_id: None,
            logical_resource_id: None,
            resource_type: None,
            service_token: None,
        }
    }

    /// Returns the physical id CloudFormation already knows, or `fallback`.
    pub fn physical_id_or(&self, fallback: impl FnOnce() -> String) -> String {
        match self.physical_resource_id.as_deref() {
            Some(value) if !value.trim().is_empty() => value.to_string(),
            _ => fallback(),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<&str, PropertyError> {
        required_str(&self.resource_properties, key)
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&str>, PropertyError> {
        optional_str(&self.resource_properties, key)
    }

    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>, PropertyError> {
        optional_u64(&self.resource_properties, key)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, PropertyError> {
        Ok(optional_bool(&self.resource_properties, key)?.unwrap_or(default))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("missing required property '{0}'")]
    Missing(String),
    #[error("property '{key}' must be {expected}, got {actual}")]
    Invalid {
        key: String,
        expected: &'static str,
        actual: String,
    },
    #[error("property '{key}' must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: String,
        min: u64,
        max: u64,
        value: u64,
    },
}

impl PropertyError {
    fn invalid(key: &str, expected: &'static str, actual: &Value) -> Self {
        Self::Invalid {
            key: key.to_string(),
            expected,
            actual: actual.to_string(),
        }
    }
}

pub fn required_str<'a>(
    properties: &'a ResourceProperties,
    key: &str,
) -> Result<&'a str, PropertyError> {
    optional_str(properties, key)?.ok_or_else(|| PropertyError::Missing(key.to_string()))
}

/// Blank strings are treated as absent.
pub fn optional_str<'a>(
    properties: &'a ResourceProperties,
    key: &str,
) -> Result<Option<&'a str>, PropertyError> {
    match properties.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.trim())),
        Some(other) => Err(PropertyError::invalid(key, "a string", other)),
    }
}

// CloudFormation stringifies every property value, so numbers arrive as "30".
pub fn optional_u64(
    properties: &ResourceProperties,
    key: &str,
) -> Result<Option<u64>, PropertyError> {
    match properties.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Number(number)) => number
            .as_u64()
            .map(Some)
            .ok_or_else(|| PropertyError::invalid(key, "a non-negative integer", value)),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(value @ Value::String(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| PropertyError::invalid(key, "a non-negative integer", value)),
        Some(other) => Err(PropertyError::invalid(key, "a non-negative integer", other)),
    }
}

pub fn optional_bool(
    properties: &ResourceProperties,
    key: &str,
) -> Result<Option<bool>, PropertyError> {
    match properties.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(value @ Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(PropertyError::invalid(key, "a boolean", value)),
        },
        Some(other) => Err(PropertyError::invalid(key, "a boolean", other)),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_resource_id: Option<String>,
    #[serde(default)]
    pub no_echo: bool,
    #[serde(default)]
    pub data: ResponseData,
}

impl LifecycleResponse {
    pub fn success(
        event: &LifecycleEvent,
        physical_resource_id: impl Into<String>,
        data: ResponseData,
    ) -> Self {
        Self::from_event(
            event,
            ResponseStatus::Success,
            None,
            physical_resource_id.into(),
            data,
        )
    }

    pub fn failed(
        event: &LifecycleEvent,
        physical_resource_id: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        let message = error.to_string();
        let data = ResponseData::from([(DATA_ERROR_KEY.to_string(), message.clone())]);
        Self::from_event(
            event,
            ResponseStatus::Failed,
            Some(message),
            physical_resource_id.into(),
            data,
        )
    }

    fn from_event(
        event: &LifecycleEvent,
        status: ResponseStatus,
        reason: Option<String>,
        physical_resource_id: String,
        data: ResponseData,
    ) -> Self {
        let physical_resource_id = if physical_resource_id.trim().is_empty() {
            event
                .logical_resource_id
                .clone()
                .unwrap_or_else(|| "custom-resource".to_string())
        } else {
            physical_resource_id
        };

        Self {
            status,
            reason,
            physical_resource_id,
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            no_echo: false,
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn data_value(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_cloudformation_envelope_with_stringified_properties() {
        let event: LifecycleEvent = serde_json::from_value(json!({
            "RequestType": "Update",
            "ResponseURL": "https://cloudformation-custom-resource-response.example/abc",
            "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/SlackRagStack/1",
            "RequestId": "req-1",
            "LogicalResourceId": "IndexReadyWait",
            "PhysicalResourceId": "delay-IndexReadyWait",
            "ResourceType": "Custom::Delay",
            "ResourceProperties": {
                "ServiceToken": "arn:aws:lambda:us-east-1:123456789012:function:delay",
                "WaitSeconds": "45",
                "WaitOnUpdate": "true"
            },
            "OldResourceProperties": {"WaitSeconds": "30"}
        }))
        .expect("event should parse");

        assert_eq!(event.request_type, RequestType::Update);
        assert_eq!(event.optional_u64("WaitSeconds"), Ok(Some(45)));
        assert_eq!(event.bool_or("WaitOnUpdate", false), Ok(true));
        assert_eq!(
            event.response_url.as_deref(),
            Some("https://cloudformation-custom-resource-response.example/abc")
        );
        assert_eq!(event.physical_id_or(|| "unused".to_string()), "delay-IndexReadyWait");
    }

    #[test]
    fn provider_framework_payload_parses_without_envelope() {
        let event: LifecycleEvent = serde_json::from_value(json!({
            "RequestType": "Delete",
            "ResourceProperties": {"WaitSeconds": 10}
        }))
        .expect("event should parse");

        assert!(event.response_url.is_none());
        assert_eq!(event.optional_u64("WaitSeconds"), Ok(Some(10)));
    }

    #[test]
    fn rejects_negative_and_non_numeric_integers() {
        let properties = ResourceProperties::from([
            ("Negative".to_string(), json!(-3)),
            ("Text".to_string(), json!("soon")),
        ]);

        assert!(matches!(
            optional_u64(&properties, "Negative"),
            Err(PropertyError::Invalid { .. })
        ));
        let error = optional_u64(&properties, "Text").expect_err("text should fail");
        assert!(error.to_string().contains("'Text'"));
    }

    #[test]
    fn blank_required_string_is_missing() {
        let properties = ResourceProperties::from([("IndexName".to_string(), json!("  "))]);
        assert_eq!(
            required_str(&properties, "IndexName"),
            Err(PropertyError::Missing("IndexName".to_string()))
        );
    }

    #[test]
    fn failed_response_carries_error_text_in_data_and_reason() {
        let mut event = LifecycleEvent::new(RequestType::Create, ResourceProperties::new());
        event.logical_resource_id = Some("VectorIndex".to_string());
        event.request_id = Some("req-9".to_string());

        let response = LifecycleResponse::failed(&event, "", "index function unreachable");

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.data_value(DATA_ERROR_KEY), Some("index function unreachable"));
        assert_eq!(response.reason.as_deref(), Some("index function unreachable"));
        assert_eq!(response.physical_resource_id, "VectorIndex");
        assert_eq!(response.request_id.as_deref(), Some("req-9"));
    }

    #[test]
    fn response_serializes_with_wire_field_names() {
        let event = LifecycleEvent::new(RequestType::Create, ResourceProperties::new());
        let response = LifecycleResponse::success(
            &event,
            "delay-resource",
            ResponseData::from([("TimeWaited".to_string(), "5".to_string())]),
        );

        let value = serde_json::to_value(&response).expect("response should serialize");
        assert_eq!(value["Status"], "SUCCESS");
        assert_eq!(value["PhysicalResourceId"], "delay-resource");
        assert_eq!(value["Data"]["TimeWaited"], "5");
        assert!(value.get("Reason").is_none());
    }
}
