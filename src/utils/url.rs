//! Endpoint construction for the vendor APIs and the REST backend.

/// Strip trailing slashes so endpoints can be appended safely.
///
/// ```
/// use parlor::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.example.com/v1///"), "https://api.example.com/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash.
///
/// ```
/// use parlor::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://generativelanguage.googleapis.com/v1beta/", "/models"),
///     "https://generativelanguage.googleapis.com/v1beta/models"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// `{project}/rest/v1/{table}`
pub fn rest_table_url(project_url: &str, table: &str) -> String {
    construct_api_url(project_url, &format!("rest/v1/{table}"))
}

/// `{project}/rest/v1/rpc/{function}`
pub fn rest_rpc_url(project_url: &str, function: &str) -> String {
    construct_api_url(project_url, &format!("rest/v1/rpc/{function}"))
}

/// PostgREST equality filter value, e.g. `eq.42`.
pub fn eq_filter(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slashes_only() {
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/"),
            "https://api.openai.com"
        );
        assert_eq!(normalize_base_url(""), "");
    }

    #[test]
    fn vendor_endpoints_join_cleanly() {
        assert_eq!(
            construct_api_url("https://api.openai.com/v1/", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            construct_api_url(
                "https://generativelanguage.googleapis.com/v1beta",
                "models/gemini-2.5-flash:streamGenerateContent?alt=sse"
            ),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn rest_paths() {
        assert_eq!(
            rest_table_url("https://proj.supabase.co/", "conversations"),
            "https://proj.supabase.co/rest/v1/conversations"
        );
        assert_eq!(
            rest_rpc_url("https://proj.supabase.co", "match_knowledge_embeddings"),
            "https://proj.supabase.co/rest/v1/rpc/match_knowledge_embeddings"
        );
        assert_eq!(eq_filter("3f2a"), "eq.3f2a");
    }
}
