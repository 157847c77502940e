//! Repository URL parsing and slug derivation.
//!
//! A slug is the deterministic content identifier for a repository:
//! `owner-name`, lowercase, alphanumeric and hyphens only. It is the key
//! under which exactly one generated article is cached.

/// Hosts we accept repository URLs from.
const RECOGNIZED_HOSTS: [&str; 3] = ["github.com", "gitlab.com", "bitbucket.org"];

/// Parse a repository URL into its (owner, name) pair.
///
/// Accepts URLs with or without a scheme, requires a recognized host and at
/// least two non-empty path segments, and strips a trailing `.git`.
pub fn parse_repo_url(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = url::Url::parse(&normalized).ok()?;
    let host = parsed.host_str()?;
    let recognized = RECOGNIZED_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")));
    if !recognized {
        return None;
    }

    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let name = segments.next()?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    if owner.is_empty() || name.is_empty() {
        return None;
    }

    Some((owner.to_string(), name.to_string()))
}

/// Derive the article slug for a repository URL.
///
/// `https://github.com/acme/widget` becomes `acme-widget`. Non-alphanumeric
/// runs collapse to a single hyphen; leading/trailing hyphens are trimmed.
pub fn url_to_slug(raw: &str) -> Option<String> {
    let (owner, name) = parse_repo_url(raw)?;
    let combined = format!("{owner}-{name}").to_lowercase();

    let mut slug = String::with_capacity(combined.len());
    let mut last_was_hyphen = false;
    for c in combined.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// Strip everything but `[a-z0-9-]` from a slug.
///
/// Route handlers reject requests where sanitization changes the input,
/// which also blocks path traversal through the slug parameter.
pub fn sanitize_slug(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}
