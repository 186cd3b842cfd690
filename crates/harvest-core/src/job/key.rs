//! Artifact keys: `<kind>/<congress>/<page>.json`, safe as relative paths.

use sha2::{Digest, Sha256};

use super::JobKind;

/// Longest page slug kept verbatim before switching to prefix + hash.
const SLUG_MAX: usize = 80;
const SLUG_PREFIX: usize = 48;

/// Storage key for a `(kind, congress, page)` target.
pub fn artifact_key(kind: JobKind, congress: u32, page_token: Option<&str>) -> String {
    let page = match page_token {
        None => "page-first".to_string(),
        Some(token) => format!("page-{}", page_slug(token)),
    };
    format!("{}/{}/{}.json", kind.as_str(), congress, page)
}

/// Turns an opaque page token (often a full URL) into a single path segment.
///
/// - Keeps ASCII alphanumerics, `-`, `_`, `.`; everything else becomes `_`
/// - Collapses consecutive underscores and trims `.`/`_` at both ends
/// - If anything was replaced or the result is long, keeps a prefix and appends
///   12 hex chars of the token's SHA-256 so distinct tokens never collide
pub fn page_slug(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut prev_underscore = false;
    let mut replaced = false;

    for c in token.chars() {
        let keep = c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_';
        let replacement = if keep { c } else { '_' };
        if !keep {
            replaced = true;
        }
        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    if !replaced && !trimmed.is_empty() && trimmed.len() == token.len() && trimmed.len() <= SLUG_MAX
    {
        return trimmed.to_string();
    }

    let digest = hex::encode(Sha256::digest(token.as_bytes()));
    // Only ASCII remains in `trimmed`, so byte slicing is on char boundaries.
    let prefix = &trimmed[..trimmed.len().min(SLUG_PREFIX)];
    if prefix.is_empty() {
        digest[..12].to_string()
    } else {
        format!("{}-{}", prefix.trim_end_matches(['.', '_']), &digest[..12])
    }
}
