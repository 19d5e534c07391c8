//! Deployment-side domain primitives for the Slack RAG assistant stack.
//!
//! This crate owns the custom-resource lifecycle contract, the property
//! parsing for each custom resource, the typed deployment context, and the
//! construct tree with its compliance suppression pass. It intentionally
//! excludes AWS SDK and Lambda runtime concerns; those live in
//! `rag_stack_lambda`.

pub mod construct;
pub mod context;
pub mod delay;
pub mod invocation_logging;
pub mod lifecycle;
pub mod naming;
pub mod stack;
pub mod suppressions;
pub mod vector_index;
