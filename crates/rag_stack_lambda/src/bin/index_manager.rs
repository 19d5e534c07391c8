use lambda_runtime::{service_fn, Error, LambdaEvent};
use rag_stack_lambda::adapters::search_index::SigV4SearchIndexClient;
use rag_stack_lambda::handlers::index_manager::handle_index_request;
use rag_stack_lambda::runtime::init_tracing;
use rag_stack_lambda::runtime::vector_index::{IndexRequest, IndexResponse};

async fn handle_request(
    client: &SigV4SearchIndexClient,
    event: LambdaEvent<IndexRequest>,
) -> Result<IndexResponse, Error> {
    Ok(handle_index_request(&event.payload, client))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let client = SigV4SearchIndexClient::from_env()
        .await
        .map_err(|error| Error::from(error.to_string()))?;

    let client = &client;
    lambda_runtime::run(service_fn(move |event| async move {
        handle_request(client, event).await
    }))
    .await
}
