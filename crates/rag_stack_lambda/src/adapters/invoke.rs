/// Synchronous call into the index manager function.
///
/// Returns the raw response payload. A function error reported by Lambda is an
/// `Err`, the same as a transport failure.
pub trait IndexFunctionInvoker {
    fn invoke_index_function(&self, payload: &[u8]) -> Result<Vec<u8>, String>;
}
