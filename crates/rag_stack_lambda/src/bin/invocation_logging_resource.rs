use aws_sdk_bedrock::types::{CloudWatchConfig, LoggingConfig, S3Config};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use rag_stack_lambda::adapters::model_logging::ModelInvocationLogging;
use rag_stack_lambda::handlers::invocation_logging::handle_invocation_logging_event;
use rag_stack_lambda::runtime::init_tracing;
use rag_stack_lambda::runtime::invocation_logging::InvocationLoggingSettings;
use rag_stack_lambda::runtime::lifecycle::{LifecycleEvent, LifecycleResponse};
use rag_stack_lambda::transport::respond;

struct BedrockInvocationLogging {
    bedrock_client: aws_sdk_bedrock::Client,
}

fn logging_config(settings: &InvocationLoggingSettings) -> Result<LoggingConfig, String> {
    let cloud_watch = CloudWatchConfig::builder()
        .log_group_name(settings.log_group_name.clone())
        .role_arn(settings.role_arn.clone())
        .build()
        .map_err(|error| format!("invalid CloudWatch delivery: {error}"))?;

    let mut config = LoggingConfig::builder()
        .cloud_watch_config(cloud_watch)
        .text_data_delivery_enabled(settings.text_data_delivery)
        .image_data_delivery_enabled(settings.image_data_delivery)
        .embedding_data_delivery_enabled(settings.embedding_data_delivery);
    if let Some(s3) = &settings.s3 {
        let s3_config = S3Config::builder()
            .bucket_name(s3.bucket_name.clone())
            .set_key_prefix(s3.key_prefix.clone())
            .build()
            .map_err(|error| format!("invalid S3 delivery: {error}"))?;
        config = config.s3_config(s3_config);
    }
    Ok(config.build())
}

impl ModelInvocationLogging for BedrockInvocationLogging {
    fn put_logging_configuration(
        &self,
        settings: &InvocationLoggingSettings,
    ) -> Result<(), String> {
        let config = logging_config(settings)?;
        let client = self.bedrock_client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .put_model_invocation_logging_configuration()
                    .logging_config(config)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| {
                        format!("failed to put invocation logging configuration: {error}")
                    })
            })
        })
    }

    fn delete_logging_configuration(&self) -> Result<(), String> {
        let client = self.bedrock_client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .delete_model_invocation_logging_configuration()
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| {
                        format!("failed to delete invocation logging configuration: {error}")
                    })
            })
        })
    }
}

struct RuntimeDependencies {
    logging: BedrockInvocationLogging,
    http_client: reqwest::Client,
}

async fn handle_request(
    deps: &RuntimeDependencies,
    event: LambdaEvent<LifecycleEvent>,
) -> Result<LifecycleResponse, Error> {
    let event = event.payload;
    let response = handle_invocation_logging_event(&event, &deps.logging);
    respond(&deps.http_client, &event, response).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RuntimeDependencies {
        logging: BedrockInvocationLogging {
            bedrock_client: aws_sdk_bedrock::Client::new(&aws_config),
        },
        http_client: reqwest::Client::new(),
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event| async move {
        handle_request(deps, event).await
    }))
    .await
}
