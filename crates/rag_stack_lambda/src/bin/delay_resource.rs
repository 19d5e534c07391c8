use lambda_runtime::{service_fn, Error, LambdaEvent};
use rag_stack_lambda::adapters::sleeper::ThreadSleeper;
use rag_stack_lambda::handlers::delay::handle_delay_event;
use rag_stack_lambda::runtime::init_tracing;
use rag_stack_lambda::runtime::lifecycle::{LifecycleEvent, LifecycleResponse};
use rag_stack_lambda::transport::respond;

async fn handle_request(
    client: &reqwest::Client,
    event: LambdaEvent<LifecycleEvent>,
) -> Result<LifecycleResponse, Error> {
    let event = event.payload;
    let response = tokio::task::block_in_place(|| handle_delay_event(&event, &ThreadSleeper));
    respond(client, &event, response).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let client = reqwest::Client::new();
    let client = &client;
    lambda_runtime::run(service_fn(move |event| async move {
        handle_request(client, event).await
    }))
    .await
}
