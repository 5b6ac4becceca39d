use std::sync::LazyLock;

use regex::Regex;

const MAX_LEN: usize = 2000;

static URL_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([a-z][a-z0-9+.\-]*://[^:/\s@]+:)[^@\s/]+@").unwrap());
static BEARER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*").unwrap());
static JWT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+").unwrap());
static PROVIDER_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:(?:sk|rk|pk)_(?:live|test)|whsec)_[A-Za-z0-9]+\b").unwrap());
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(password|passwd|secret|token|api[_\-]?key|access[_\-]?key|authorization)(["']?\s*[=:]\s*)("[^"]*"|'[^']*'|[^\s,;&"']+)"#,
    )
    .unwrap()
});
static CARD_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:\d[ \-]?){12,18}\d\b").unwrap());

/// Redacts credentials, tokens and card numbers from a message before it is logged or stored.
pub fn sanitize(message: &str) -> String {
    let out = URL_CREDENTIALS.replace_all(message, "${1}[REDACTED]@");
    let out = BEARER.replace_all(&out, "Bearer [REDACTED]");
    let out = JWT.replace_all(&out, "[REDACTED_JWT]");
    let out = PROVIDER_KEY.replace_all(&out, "[REDACTED_KEY]");
    let out = KEY_VALUE.replace_all(&out, "${1}${2}[REDACTED]");
    let out = CARD_NUMBER.replace_all(&out, "[REDACTED_CARD]");

    truncate(&out, MAX_LEN)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::password("login failed password=hunter2 for bob", "login failed password=[REDACTED] for bob")]
    #[case::quoted_json(r#"{"token": "abc.def"}"#, r#"{"token": [REDACTED]}"#)]
    #[case::api_key("api_key: 1234abcd", "api_key: [REDACTED]")]
    #[case::bearer("header Authorization Bearer abc123xyz", "header Authorization Bearer [REDACTED]")]
    #[case::stripe("stripe rejected sk_live_51Habc123", "stripe rejected [REDACTED_KEY]")]
    #[case::webhook_secret("bad whsec_Zx81 signature", "bad [REDACTED_KEY] signature")]
    #[case::card("card 4242 4242 4242 4242 declined", "card [REDACTED_CARD] declined")]
    #[case::card_dashes("card 4000-0000-0000-0002", "card [REDACTED_CARD]")]
    #[case::url("connect postgres://app:s3cret@db:5432/site", "connect postgres://app:[REDACTED]@db:5432/site")]
    fn redacts_secrets(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn redacts_bare_jwts() {
        let jwt = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOjF9.c2lnbmF0dXJl";
        assert_eq!(sanitize(&format!("decode {} failed", jwt)), "decode [REDACTED_JWT] failed");
    }

    #[test]
    fn leaves_ordinary_messages_alone() {
        let msg = "relation \"videos\" does not exist at character 15";
        assert_eq!(sanitize(msg), msg);
        assert_eq!(sanitize("video 12345 not found"), "video 12345 not found");
    }

    #[test]
    fn truncates_long_messages() {
        let long = "x".repeat(MAX_LEN + 50);
        let out = sanitize(&long);
        assert_eq!(out.chars().count(), MAX_LEN + 3);
        assert!(out.ends_with("..."));
    }
}
