use rag_stack_core::invocation_logging::InvocationLoggingSettings;

/// Account-level Bedrock model invocation logging configuration.
pub trait ModelInvocationLogging {
    fn put_logging_configuration(&self, settings: &InvocationLoggingSettings) -> Result<(), String>;
    fn delete_logging_configuration(&self) -> Result<(), String>;
}
