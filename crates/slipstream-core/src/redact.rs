//! Scrubbing of sensitive material from client-facing text.
//!
//! Error messages that originate upstream or in the account layer may carry
//! email addresses, OAuth token fragments, project IDs, internal hostnames,
//! or filesystem paths. Everything that crosses the HTTP boundary passes
//! through [`redact_sensitive`] first. Internal logs keep the raw text.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex")
});

static BEARER: LazyLock<Regex> = LazyLock::new(|| {
    // OAuth access tokens (ya29.…), bearer headers, refresh tokens (1//…).
    Regex::new(r"(Bearer\s+\S+|ya29\.[A-Za-z0-9_\-\.]+|1//[A-Za-z0-9_\-]+)").expect("bearer regex")
});

static PROJECT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bprojects?/[a-z][a-z0-9-]{4,28}[a-z0-9]\b").expect("project regex")
});

static HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[A-Za-z0-9.-]+\.googleapis\.com\S*").expect("host regex")
});

static PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:/[A-Za-z0-9._-]+){2,}").expect("path regex"));

/// Replace sensitive fragments with `[redacted]`.
///
/// Order matters: URLs are scrubbed before bare paths so an endpoint URL is
/// collapsed in one piece instead of leaving its scheme behind.
#[must_use]
pub fn redact_sensitive(input: &str) -> String {
    let s = EMAIL.replace_all(input, "[redacted]");
    let s = BEARER.replace_all(&s, "[redacted]");
    let s = HOST.replace_all(&s, "[redacted]");
    let s = PROJECT_ID.replace_all(&s, "[redacted]");
    let s = PATH.replace_all(&s, "[redacted]");
    s.into_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email() {
        let out = redact_sensitive("account bob.smith+x@gmail.com is invalid");
        assert_eq!(out, "account [redacted] is invalid");
    }

    #[test]
    fn redacts_access_token() {
        let out = redact_sensitive("token ya29.a0AfH6SMB-abc_123 rejected");
        assert!(!out.contains("ya29"));
    }

    #[test]
    fn redacts_refresh_token() {
        let out = redact_sensitive("grant 1//0gFoo-Bar_baz failed");
        assert!(!out.contains("1//0g"));
    }

    #[test]
    fn redacts_bearer_header() {
        let out = redact_sensitive("Authorization: Bearer abc.def.ghi");
        assert!(!out.contains("abc.def.ghi"));
    }

    #[test]
    fn redacts_endpoint_url() {
        let out = redact_sensitive("POST https://cloudcode-pa.googleapis.com/v1internal failed");
        assert!(!out.contains("googleapis.com"));
    }

    #[test]
    fn redacts_project_path() {
        let out = redact_sensitive("resource projects/my-proxy-project-1234 exhausted");
        assert!(!out.contains("my-proxy-project"));
    }

    #[test]
    fn redacts_file_path() {
        let out = redact_sensitive("read /home/user/.slipstream/accounts.json failed");
        assert!(!out.contains("accounts.json"));
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(redact_sensitive("rate limited"), "rate limited");
    }
}
