//! Lambda handlers behind the stack's custom resources.
//!
//! Handlers are plain functions over adapter traits so they run unchanged in
//! tests. The binaries under `src/bin` wire the AWS clients in and deliver the
//! lifecycle response.

pub mod adapters;
pub mod handlers;
pub mod runtime;
pub mod transport;
