use rag_stack_core::invocation_logging::{InvocationLoggingSettings, INVOCATION_LOGGING_PHYSICAL_ID};
use rag_stack_core::lifecycle::{LifecycleEvent, LifecycleResponse, RequestType, ResponseData};
use tracing::{info, warn};

use crate::adapters::model_logging::ModelInvocationLogging;
use crate::handlers::HandlerError;

pub fn handle_invocation_logging_event(
    event: &LifecycleEvent,
    api: &dyn ModelInvocationLogging,
) -> LifecycleResponse {
    let physical_id = event.physical_id_or(|| INVOCATION_LOGGING_PHYSICAL_ID.to_string());

    let result = match event.request_type {
        RequestType::Create | RequestType::Update => put_configuration(event, api),
        RequestType::Delete => api
            .delete_logging_configuration()
            .map(|()| ResponseData::new())
            .map_err(|error| HandlerError::ModelLogging(error).to_string()),
    };

    match result {
        Ok(data) => {
            info!(request_type = %event.request_type, "invocation logging configured");
            LifecycleResponse::success(event, physical_id, data)
        }
        Err(error) => {
            warn!(
                request_type = %event.request_type,
                error = %error,
                "invocation logging request failed"
            );
            LifecycleResponse::failed(event, physical_id, error)
        }
    }
}

fn put_configuration(
    event: &LifecycleEvent,
    api: &dyn ModelInvocationLogging,
) -> Result<ResponseData, String> {
    let settings = InvocationLoggingSettings::from_event(event).map_err(|error| error.to_string())?;
    api.put_logging_configuration(&settings)
        .map_err(|error| HandlerError::ModelLogging(error).to_string())?;

    let mut data = ResponseData::from([("LogGroupName".to_string(), settings.log_group_name)]);
    if let Some(s3) = settings.s3 {
        data.insert("BucketName".to_string(), s3.bucket_name);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rag_stack_core::lifecycle::{ResourceProperties, DATA_ERROR_KEY};
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingLoggingApi {
        puts: Mutex<Vec<InvocationLoggingSettings>>,
        deletes: Mutex<usize>,
        fail_with: Option<String>,
    }

    impl ModelInvocationLogging for RecordingLoggingApi {
        fn put_logging_configuration(
            &self,
            settings: &InvocationLoggingSettings,
        ) -> Result<(), String> {
            if let Some(error) = &self.fail_with {
                return Err(error.clone());
            }
            self.puts.lock().expect("poisoned mutex").push(settings.clone());
            Ok(())
        }

        fn delete_logging_configuration(&self) -> Result<(), String> {
            *self.deletes.lock().expect("poisoned mutex") += 1;
            Ok(())
        }
    }

    fn event(request_type: RequestType) -> LifecycleEvent {
        let properties: ResourceProperties = serde_json::from_value(json!({
            "LogGroupName": "/slack-rag/dev/bedrock-invocations",
            "RoleArn": "arn:aws:iam::123456789012:role/delivery",
            "BucketName": "slack-rag-dev-access-logs-bucket",
            "KeyPrefix": "bedrock-invocations/",
            "ImageDataDelivery": "false"
        }))
        .expect("properties should parse");
        LifecycleEvent::new(request_type, properties)
    }

    #[test]
    fn create_puts_configuration_with_s3_delivery() {
        let api = RecordingLoggingApi::default();
        let response = handle_invocation_logging_event(&event(RequestType::Create), &api);

        assert!(response.is_success());
        assert_eq!(response.physical_resource_id, INVOCATION_LOGGING_PHYSICAL_ID);
        let puts = api.puts.lock().expect("poisoned mutex");
        assert_eq!(puts.len(), 1);
        assert_eq!(
            puts[0].s3.as_ref().map(|s3| s3.bucket_name.as_str()),
            Some("slack-rag-dev-access-logs-bucket")
        );
        assert!(puts[0].text_data_delivery);
        assert!(!puts[0].image_data_delivery);
    }

    #[test]
    fn delete_removes_configuration_without_reading_properties() {
        let api = RecordingLoggingApi::default();
        let delete = LifecycleEvent::new(RequestType::Delete, ResourceProperties::new());

        let response = handle_invocation_logging_event(&delete, &api);

        assert!(response.is_success());
        assert_eq!(*api.deletes.lock().expect("poisoned mutex"), 1);
    }

    #[test]
    fn api_failure_becomes_failed_response() {
        let api = RecordingLoggingApi {
            fail_with: Some("AccessDeniedException".to_string()),
            ..RecordingLoggingApi::default()
        };
        let response = handle_invocation_logging_event(&event(RequestType::Update), &api);

        assert!(!response.is_success());
        assert!(response
            .data_value(DATA_ERROR_KEY)
            .is_some_and(|error| error.contains("AccessDeniedException")));
    }
}
