/// Secrets shorter than this are hidden entirely
const MIN_PREFIX_LENGTH: usize = 16;

/// Number of leading characters kept for longer secrets
const VISIBLE_PREFIX: usize = 4;

/// Hide a token for logging, keeping a short prefix so two tokens can
/// still be told apart.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    if secret.chars().count() < MIN_PREFIX_LENGTH {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE_PREFIX).collect();
    format!("{}****", prefix)
}
