use std::time::Instant;

use rag_stack_core::delay::{delay_physical_id, DelayPlan, DESCRIPTION_KEY, TIME_WAITED_KEY};
use rag_stack_core::lifecycle::{LifecycleEvent, LifecycleResponse, ResponseData};
use tracing::{info, warn};

use crate::adapters::sleeper::Sleeper;

pub fn handle_delay_event(event: &LifecycleEvent, sleeper: &impl Sleeper) -> LifecycleResponse {
    let physical_id = delay_physical_id(event);
    let plan = match DelayPlan::from_event(event) {
        Ok(plan) => plan,
        Err(error) => {
            warn!(
                request_type = %event.request_type,
                physical_id = %physical_id,
                error = %error,
                "rejected delay properties"
            );
            return LifecycleResponse::failed(event, physical_id, error);
        }
    };

    let started_at = Instant::now();
    info!(
        request_type = %event.request_type,
        physical_id = %physical_id,
        wait_seconds = plan.wait.as_secs(),
        description = %plan.description,
        "delay started"
    );
    sleeper.sleep(plan.wait);
    info!(
        physical_id = %physical_id,
        duration_ms = started_at.elapsed().as_millis() as u64,
        "delay completed"
    );

    let data = ResponseData::from([
        (TIME_WAITED_KEY.to_string(), plan.wait.as_secs().to_string()),
        (DESCRIPTION_KEY.to_string(), plan.description),
    ]);
    LifecycleResponse::success(event, physical_id, data)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use rag_stack_core::lifecycle::{RequestType, ResourceProperties, DATA_ERROR_KEY};
    use serde_json::{json, Value};

    use super::*;
    use crate::adapters::sleeper::ThreadSleeper;

    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                sleeps: Mutex::new(Vec::new()),
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().expect("poisoned mutex").clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().expect("poisoned mutex").push(duration);
        }
    }

    fn event(request_type: RequestType, properties: Value) -> LifecycleEvent {
        let properties: ResourceProperties =
            serde_json::from_value(properties).expect("properties should parse");
        let mut event = LifecycleEvent::new(request_type, properties);
        event.logical_resource_id = Some("CollectionReadyWait".to_string());
        event
    }

    #[test]
    fn create_waits_and_reports_time_waited() {
        let sleeper = RecordingSleeper::new();
        let response = handle_delay_event(
            &event(
                RequestType::Create,
                json!({"WaitSeconds": 60, "Description": "collection policies"}),
            ),
            &sleeper,
        );

        assert!(response.is_success());
        assert_eq!(response.physical_resource_id, "delay-CollectionReadyWait");
        assert_eq!(response.data_value(TIME_WAITED_KEY), Some("60"));
        assert_eq!(response.data_value(DESCRIPTION_KEY), Some("collection policies"));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(60)]);
    }

    #[test]
    fn create_really_sleeps_on_the_thread_sleeper() {
        let started_at = Instant::now();
        let response = handle_delay_event(
            &event(RequestType::Create, json!({"WaitSeconds": "1"})),
            &ThreadSleeper,
        );

        assert!(response.is_success());
        assert_eq!(response.data_value(TIME_WAITED_KEY), Some("1"));
        assert!(started_at.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn delete_returns_immediately_even_with_broken_properties() {
        let sleeper = RecordingSleeper::new();
        let mut delete = event(RequestType::Delete, json!({"WaitSeconds": "forever"}));
        delete.physical_resource_id = Some("delay-CollectionReadyWait".to_string());

        let response = handle_delay_event(&delete, &sleeper);

        assert!(response.is_success());
        assert_eq!(response.data_value(TIME_WAITED_KEY), Some("0"));
        assert_eq!(response.physical_resource_id, "delay-CollectionReadyWait");
        assert_eq!(sleeper.sleeps(), vec![Duration::ZERO]);
    }

    #[test]
    fn update_only_waits_when_asked_to() {
        let sleeper = RecordingSleeper::new();
        let skipped = handle_delay_event(
            &event(RequestType::Update, json!({"WaitSeconds": 30})),
            &sleeper,
        );
        let waited = handle_delay_event(
            &event(
                RequestType::Update,
                json!({"WaitSeconds": 30, "WaitOnUpdate": "true"}),
            ),
            &sleeper,
        );

        assert_eq!(skipped.data_value(TIME_WAITED_KEY), Some("0"));
        assert_eq!(waited.data_value(TIME_WAITED_KEY), Some("30"));
    }

    #[test]
    fn out_of_range_wait_fails_without_sleeping() {
        let sleeper = RecordingSleeper::new();
        let response = handle_delay_event(
            &event(RequestType::Create, json!({"WaitSeconds": 901})),
            &sleeper,
        );

        assert!(!response.is_success());
        assert!(response
            .data_value(DATA_ERROR_KEY)
            .is_some_and(|error| error.contains("WaitSeconds")));
        assert!(response.reason.is_some());
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn missing_logical_id_uses_generic_physical_id() {
        let mut create = event(RequestType::Create, json!({"WaitSeconds": 0}));
        create.logical_resource_id = None;

        let response = handle_delay_event(&create, &RecordingSleeper::new());
        assert_eq!(response.physical_resource_id, "delay-resource");
    }
}
