pub mod invoke;
pub mod model_logging;
pub mod search_index;
pub mod sleeper;
