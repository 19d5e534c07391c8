use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use rag_stack_lambda::adapters::invoke::IndexFunctionInvoker;
use rag_stack_lambda::handlers::vector_index::handle_vector_index_event;
use rag_stack_lambda::runtime::init_tracing;
use rag_stack_lambda::runtime::lifecycle::{LifecycleEvent, LifecycleResponse};
use rag_stack_lambda::transport::respond;

struct LambdaIndexInvoker {
    function_name: String,
    lambda_client: aws_sdk_lambda::Client,
}

impl IndexFunctionInvoker for LambdaIndexInvoker {
    fn invoke_index_function(&self, payload: &[u8]) -> Result<Vec<u8>, String> {
        let function_name = self.function_name.clone();
        let body = payload.to_vec();
        let client = self.lambda_client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .invoke()
                    .function_name(function_name)
                    .invocation_type(InvocationType::RequestResponse)
                    .payload(Blob::new(body))
                    .send()
                    .await
                    .map_err(|error| format!("failed to invoke index function: {error}"))?;

                let payload = output
                    .payload()
                    .map(|blob| blob.as_ref().to_vec())
                    .unwrap_or_default();
                if let Some(function_error) = output.function_error() {
                    return Err(format!(
                        "index function raised {function_error}: {}",
                        String::from_utf8_lossy(&payload)
                    ));
                }
                Ok(payload)
            })
        })
    }
}

struct RuntimeDependencies {
    invoker: LambdaIndexInvoker,
    http_client: reqwest::Client,
}

async fn handle_request(
    deps: &RuntimeDependencies,
    event: LambdaEvent<LifecycleEvent>,
) -> Result<LifecycleResponse, Error> {
    let event = event.payload;
    let response = handle_vector_index_event(&event, &deps.invoker);
    respond(&deps.http_client, &event, response).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RuntimeDependencies {
        invoker: LambdaIndexInvoker {
            function_name: std::env::var("INDEX_FUNCTION_NAME")
                .map_err(|_| Error::from("INDEX_FUNCTION_NAME must be configured"))?,
            lambda_client: aws_sdk_lambda::Client::new(&aws_config),
        },
        http_client: reqwest::Client::new(),
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event| async move {
        handle_request(deps, event).await
    }))
    .await
}
