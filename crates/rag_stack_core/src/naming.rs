use sha2::{Digest, Sha256};

/// OpenSearch Serverless collection names are capped at 32 characters.
pub const MAX_COLLECTION_NAME_LEN: usize = 32;
/// Lambda function names are capped at 64 characters.
pub const MAX_FUNCTION_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFamily {
    Bucket,
    Table,
    Queue,
    Secret,
    Function,
    Collection,
    KnowledgeBase,
    Guardrail,
    Prompt,
    LogGroup,
}

impl ResourceFamily {
    fn suffix(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Table => "table",
            Self::Queue => "queue",
            Self::Secret => "secret",
            Self::Function => "fn",
            Self::Collection => "vectors",
            Self::KnowledgeBase => "kb",
            Self::Guardrail => "guardrail",
            Self::Prompt => "prompt",
            Self::LogGroup => "logs",
        }
    }
}

pub fn resource_name(
    prefix: &str,
    environment: &str,
    name: &str,
    family: ResourceFamily,
) -> String {
    let trimmed = prefix.trim_matches('-');
    format!("{trimmed}-{environment}-{name}-{}", family.suffix())
}

/// Collection names must be lowercase, start with a letter and fit in 32 chars.
pub fn collection_name(prefix: &str, environment: &str) -> String {
    let raw = format!(
        "{}-{environment}",
        prefix.trim_matches('-').to_ascii_lowercase()
    );
    let mut name: String = raw
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();
    if !name.starts_with(|ch: char| ch.is_ascii_lowercase()) {
        name.insert(0, 'c');
    }
    truncate_with_digest(&name, MAX_COLLECTION_NAME_LEN)
}

pub fn function_name(prefix: &str, environment: &str, name: &str) -> String {
    truncate_with_digest(
        &resource_name(prefix, environment, name, ResourceFamily::Function),
        MAX_FUNCTION_NAME_LEN,
    )
}

/// Stable for a given index name, so redeploys with the same name are no-ops.
pub fn physical_id_for_index(index_name: &str) -> String {
    format!("vector-index-{index_name}")
}

pub fn digest_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate_with_digest(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let digest = digest_hex(name);
    let keep = max_len - 9;
    format!("{}-{}", name[..keep].trim_end_matches('-'), &digest[..8])
}
