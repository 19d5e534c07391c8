//! Wait-for-consistency custom resource.
//!
//! The resource blocks the stack's creation sequence for `WaitSeconds` so
//! that dependent control planes (OpenSearch Serverless data access policies,
//! freshly created indices) have settled before the next resource is created.

use std::time::Duration;

use crate::lifecycle::{LifecycleEvent, PropertyError, RequestType};

/// Upper bound imposed by the Lambda timeout of the handler.
pub const MAX_WAIT_SECONDS: u64 = 900;

pub const WAIT_SECONDS_PROPERTY: &str = "WaitSeconds";
pub const DESCRIPTION_PROPERTY: &str = "Description";
pub const WAIT_ON_UPDATE_PROPERTY: &str = "WaitOnUpdate";

pub const TIME_WAITED_KEY: &str = "TimeWaited";
pub const DESCRIPTION_KEY: &str = "Description";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayProperties {
    pub wait_seconds: u64,
    pub description: String,
    pub wait_on_update: bool,
}

impl DelayProperties {
    pub fn from_event(event: &LifecycleEvent) -> Result<Self, PropertyError> {
        let wait_seconds = event
            .optional_u64(WAIT_SECONDS_PROPERTY)?
            .ok_or_else(|| PropertyError::Missing(WAIT_SECONDS_PROPERTY.to_string()))?;
        if wait_seconds > MAX_WAIT_SECONDS {
            return Err(PropertyError::OutOfRange {
                key: WAIT_SECONDS_PROPERTY.to_string(),
                min: 0,
                max: MAX_WAIT_SECONDS,
                value: wait_seconds,
            });
        }

        Ok(Self {
            wait_seconds,
            description: event
                .optional_str(DESCRIPTION_PROPERTY)?
                .unwrap_or_default()
                .to_string(),
            wait_on_update: event.bool_or(WAIT_ON_UPDATE_PROPERTY, false)?,
        })
    }
}

/// What a single invocation is going to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayPlan {
    pub wait: Duration,
    pub description: String,
}

impl DelayPlan {
    /// Delete never inspects the properties, so a broken resource can always be removed.
    pub fn from_event(event: &LifecycleEvent) -> Result<Self, PropertyError> {
        if event.request_type == RequestType::Delete {
            let description = event
                .optional_str(DESCRIPTION_PROPERTY)
                .ok()
                .flatten()
                .unwrap_or_default()
                .to_string();
            return Ok(Self {
                wait: Duration::ZERO,
                description,
            });
        }

        let properties = DelayProperties::from_event(event)?;
        let waits = match event.request_type {
            RequestType::Create => true,
            RequestType::Update => properties.wait_on_update,
            RequestType::Delete => false,
        };

        Ok(Self {
            wait: if waits {
                Duration::from_secs(properties.wait_seconds)
            } else {
                Duration::ZERO
            },
            description: properties.description,
        })
    }
}

pub fn delay_physical_id(event: &LifecycleEvent) -> String {
    event.physical_id_or(|| match event.logical_resource_id.as_deref() {
        Some(logical_id) if !logical_id.trim().is_empty() => format!("delay-{logical_id}"),
        _ => "delay-resource".to_string(),
    })
}
