//! Deployment context: the JSON config file fed to the stack, validated once
//! at the root before any construct is declared.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::delay::MAX_WAIT_SECONDS;
use crate::naming::digest_hex;
use crate::vector_index::{is_valid_index_name, MAX_DIMENSIONS};

pub const CONFIG_PATH_ENV: &str = "RAG_STACK_CONFIG";

pub const DEFAULT_STACK_NAME: &str = "SlackRagStack";
pub const DEFAULT_RESOURCE_PREFIX: &str = "slack-rag";
pub const DEFAULT_ENVIRONMENT: &str = "dev";
pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "amazon.titan-embed-text-v2:0";
pub const DEFAULT_EMBEDDING_DIMENSIONS: u64 = 1024;
pub const DEFAULT_GENERATION_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const DEFAULT_VECTOR_INDEX_NAME: &str = "bedrock-knowledge-base-default-index";
pub const DEFAULT_WAIT_SECONDS: u64 = 60;
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_BLOCKED_MESSAGE: &str =
    "Sorry, I can't help with that request in this workspace.";

const REQUIRED_VARIABLES: [&str; 2] = ["slackBotToken", "slackSigningSecret"];

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Missing required context variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
    #[error("invalid context variable '{key}': {message}")]
    Invalid { key: String, message: String },
    #[error("invalid context override '{0}': expected key=value")]
    Override(String),
    #[error("unknown context variable '{0}'")]
    UnknownVariable(String),
    #[error("failed to read context file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse context file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ContextError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailContext {
    pub enabled: Option<bool>,
    pub blocked_input_messaging: Option<String>,
    pub blocked_outputs_messaging: Option<String>,
}

/// The config file as written; every key is optional until validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawContext {
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub stack_name: Option<String>,
    pub resource_prefix: Option<String>,
    pub environment: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
    pub embedding_model_id: Option<String>,
    pub embedding_dimensions: Option<u64>,
    pub generation_model_id: Option<String>,
    pub vector_index_name: Option<String>,
    pub collection_ready_wait_seconds: Option<u64>,
    pub index_ready_wait_seconds: Option<u64>,
    pub guardrail: Option<GuardrailContext>,
    pub invocation_logging: Option<bool>,
    pub log_retention_days: Option<u32>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

pub fn load_raw_context(path: &Path) -> Result<RawContext, ContextError> {
    let text = std::fs::read_to_string(path).map_err(|source| ContextError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ContextError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl RawContext {
    /// Applies `key=value` overrides; `guardrail.enabled=false` reaches one level down.
    /// A value keeps its JSON type only when the field accepts it, so
    /// `account=123456789012` stays a string.
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<(), ContextError> {
        if overrides.is_empty() {
            return Ok(());
        }

        let mut document = serde_json::to_value(&*self)
            .map_err(|error| ContextError::invalid("context", error.to_string()))?;
        for entry in overrides {
            let Some((key, raw_value)) = entry.split_once('=') else {
                return Err(ContextError::Override(entry.clone()));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ContextError::Override(entry.clone()));
            }
            if !is_known_key(&document, key) {
                return Err(ContextError::UnknownVariable(key.to_string()));
            }

            let text = Value::String(raw_value.to_string());
            match serde_json::from_str::<Value>(raw_value) {
                Ok(typed) if !typed.is_string() => {
                    *override_slot(&mut document, key) = typed;
                    if serde_json::from_value::<RawContext>(document.clone()).is_err() {
                        *override_slot(&mut document, key) = text;
                    }
                }
                _ => *override_slot(&mut document, key) = text,
            }
        }

        *self = serde_json::from_value(document)
            .map_err(|error| ContextError::invalid("override", error.to_string()))?;
        Ok(())
    }
}

/// Every field serializes, so a valid top-level key is always present.
/// `tags.<name>` accepts any name; other nested keys must exist on the nested struct.
fn is_known_key(document: &Value, key: &str) -> bool {
    let Some(fields) = document.as_object() else {
        return false;
    };
    match key.split_once('.') {
        None => fields.contains_key(key),
        Some(("tags", child)) => !child.is_empty(),
        Some(("guardrail", child)) => serde_json::to_value(GuardrailContext::default())
            .ok()
            .and_then(|nested| nested.as_object().map(|nested| nested.contains_key(child)))
            .unwrap_or(false),
        Some(_) => false,
    }
}

fn override_slot<'a>(document: &'a mut Value, key: &str) -> &'a mut Value {
    match key.split_once('.') {
        Some((parent, child)) => {
            let slot = &mut document[parent];
            if !slot.is_object() {
                *slot = Value::Object(serde_json::Map::new());
            }
            &mut slot[child]
        }
        None => &mut document[key],
    }
}

/// A secret from the config file; never printed or serialized in clear.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailSettings {
    pub enabled: bool,
    pub blocked_input_messaging: String,
    pub blocked_outputs_messaging: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentContext {
    pub slack_bot_token: SecretValue,
    pub slack_signing_secret: SecretValue,
    pub stack_name: String,
    pub resource_prefix: String,
    pub environment: String,
    pub account: Option<String>,
    pub region: Option<String>,
    pub embedding_model_id: String,
    pub embedding_dimensions: u64,
    pub generation_model_id: String,
    pub vector_index_name: String,
    pub collection_ready_wait_seconds: u64,
    pub index_ready_wait_seconds: u64,
    pub guardrail: GuardrailSettings,
    pub invocation_logging: bool,
    pub log_retention_days: u32,
    pub tags: BTreeMap<String, String>,
}

impl DeploymentContext {
    pub fn from_raw(raw: RawContext) -> Result<Self, ContextError> {
        Self::from_raw_with_env(raw, |key| std::env::var(key).ok())
    }

    pub fn from_raw_with_env(
        raw: RawContext,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ContextError> {
        let provided = [&raw.slack_bot_token, &raw.slack_signing_secret];
        let missing: Vec<String> = REQUIRED_VARIABLES
            .iter()
            .zip(provided)
            .filter(|(_, value)| non_blank(value.as_deref()).is_none())
            .map(|(name, _)| (*name).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ContextError::MissingVariables(missing));
        }

        let stack_name = or_default(raw.stack_name, DEFAULT_STACK_NAME);
        if !stack_name.starts_with(|ch: char| ch.is_ascii_alphabetic())
            || !stack_name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return Err(ContextError::invalid(
                "stackName",
                "must start with a letter and contain only letters, digits and hyphens",
            ));
        }

        let resource_prefix = or_default(raw.resource_prefix, DEFAULT_RESOURCE_PREFIX);
        validate_slug("resourcePrefix", &resource_prefix)?;
        let environment = or_default(raw.environment, DEFAULT_ENVIRONMENT);
        validate_slug("environment", &environment)?;

        let embedding_dimensions = raw
            .embedding_dimensions
            .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
        if embedding_dimensions == 0 || embedding_dimensions > MAX_DIMENSIONS {
            return Err(ContextError::invalid(
                "embeddingDimensions",
                format!("must be between 1 and {MAX_DIMENSIONS}"),
            ));
        }

        let vector_index_name = or_default(raw.vector_index_name, DEFAULT_VECTOR_INDEX_NAME);
        if !is_valid_index_name(&vector_index_name) {
            return Err(ContextError::invalid(
                "vectorIndexName",
                "must be a lowercase OpenSearch index name",
            ));
        }

        let collection_ready_wait_seconds = wait_seconds(
            "collectionReadyWaitSeconds",
            raw.collection_ready_wait_seconds,
        )?;
        let index_ready_wait_seconds =
            wait_seconds("indexReadyWaitSeconds", raw.index_ready_wait_seconds)?;

        let log_retention_days = raw.log_retention_days.unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
        if log_retention_days == 0 {
            return Err(ContextError::invalid(
                "logRetentionDays",
                "must be a positive number of days",
            ));
        }

        let guardrail = raw.guardrail.unwrap_or_default();
        let account = non_blank(raw.account.as_deref())
            .map(str::to_string)
            .or_else(|| env("CDK_DEFAULT_ACCOUNT"));
        let region = non_blank(raw.region.as_deref())
            .map(str::to_string)
            .or_else(|| env("CDK_DEFAULT_REGION"))
            .or_else(|| env("AWS_REGION"));

        Ok(Self {
            slack_bot_token: SecretValue(
                raw.slack_bot_token.unwrap_or_default().trim().to_string(),
            ),
            slack_signing_secret: SecretValue(
                raw.slack_signing_secret.unwrap_or_default().trim().to_string(),
            ),
            stack_name,
            resource_prefix,
            environment,
            account,
            region,
            embedding_model_id: or_default(raw.embedding_model_id, DEFAULT_EMBEDDING_MODEL_ID),
            embedding_dimensions,
            generation_model_id: or_default(raw.generation_model_id, DEFAULT_GENERATION_MODEL_ID),
            vector_index_name,
            collection_ready_wait_seconds,
            index_ready_wait_seconds,
            guardrail: GuardrailSettings {
                enabled: guardrail.enabled.unwrap_or(true),
                blocked_input_messaging: or_default(
                    guardrail.blocked_input_messaging,
                    DEFAULT_BLOCKED_MESSAGE,
                ),
                blocked_outputs_messaging: or_default(
                    guardrail.blocked_outputs_messaging,
                    DEFAULT_BLOCKED_MESSAGE,
                ),
            },
            invocation_logging: raw.invocation_logging.unwrap_or(true),
            log_retention_days,
            tags: raw.tags,
        })
    }

    /// Digest of the resolved, redacted context.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        digest_hex(&json)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

fn or_default(value: Option<String>, default: &str) -> String {
    non_blank(value.as_deref()).unwrap_or(default).to_string()
}

fn validate_slug(key: &str, value: &str) -> Result<(), ContextError> {
    let valid = value.len() <= 20
        && value.starts_with(|ch: char| ch.is_ascii_lowercase())
        && value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(ContextError::invalid(
            key,
            "must be 1-20 lowercase letters, digits or hyphens, starting with a letter",
        ))
    }
}

fn wait_seconds(key: &str, value: Option<u64>) -> Result<u64, ContextError> {
    let seconds = value.unwrap_or(DEFAULT_WAIT_SECONDS);
    if seconds > MAX_WAIT_SECONDS {
        return Err(ContextError::invalid(
            key,
            format!("must be at most {MAX_WAIT_SECONDS} seconds"),
        ));
    }
    Ok(seconds)
}
