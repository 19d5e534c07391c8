//! Properties of the custom resource that turns on Bedrock model invocation
//! logging for the account and region the stack is deployed to.

use crate::lifecycle::{LifecycleEvent, PropertyError};

/// Invocation logging is an account/region singleton, so the id is fixed.
pub const INVOCATION_LOGGING_PHYSICAL_ID: &str = "bedrock-invocation-logging";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Delivery {
    pub bucket_name: String,
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationLoggingSettings {
    pub log_group_name: String,
    pub role_arn: String,
    pub s3: Option<S3Delivery>,
    pub text_data_delivery: bool,
    pub image_data_delivery: bool,
    pub embedding_data_delivery: bool,
}

impl InvocationLoggingSettings {
    pub fn from_event(event: &LifecycleEvent) -> Result<Self, PropertyError> {
        let role_arn = event.required_str("RoleArn")?;
        if !role_arn.starts_with("arn:") {
            return Err(PropertyError::Invalid {
                key: "RoleArn".to_string(),
                expected: "an IAM role ARN",
                actual: role_arn.to_string(),
            });
        }

        let s3 = match event.optional_str("BucketName")? {
            Some(bucket_name) => Some(S3Delivery {
                bucket_name: bucket_name.to_string(),
                key_prefix: event.optional_str("KeyPrefix")?.map(str::to_string),
            }),
            None => None,
        };

        Ok(Self {
            log_group_name: event.required_str("LogGroupName")?.to_string(),
            role_arn: role_arn.to_string(),
            s3,
            text_data_delivery: event.bool_or("TextDataDelivery", true)?,
            image_data_delivery: event.bool_or("ImageDataDelivery", false)?,
            embedding_data_delivery: event.bool_or("EmbeddingDataDelivery", true)?,
        })
    }
}
