/// Helper utilities for the envault CLI

use std::path::PathBuf;

use chrono::Local;

/// Mask the password in a connection URI for log and error output.
///
/// `postgresql://user:secret@:5432/db?host=h` becomes
/// `postgresql://user:****@:5432/db?host=h`. Strings without a
/// `scheme://creds@` shape pass through unchanged.
pub fn redact_credentials(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest = &uri[scheme_end + 3..];
    // the password itself may contain '@', so the credentials end at the
    // last '@' before the path segment
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return uri.to_string();
    };
    let credentials = &rest[..at];
    match credentials.split_once(':') {
        Some((user, _password)) => format!(
            "{}://{}:****@{}",
            &uri[..scheme_end],
            user,
            &rest[at + 1..]
        ),
        None => uri.to_string(),
    }
}

/// Format bytes to human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1_000;
    const MB: u64 = 1_000_000;
    const GB: u64 = 1_000_000_000;
    const TB: u64 = 1_000_000_000_000;

    if bytes >= TB {
        format!("{:.1}TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.0}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Local timestamp suitable for file names.
pub fn timestamp_suffix() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Default archive output path: `envault-<timestamp>.zip` in the cwd.
pub fn default_output_path() -> PathBuf {
    PathBuf::from(format!("envault-{}.zip", timestamp_suffix()))
}

/// Split a comma-separated exclusion list, dropping empty segments.
pub fn parse_exclusions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_password_in_uri() {
        let uri = "postgresql://envizon:s3cret@:5432/envizon?host=db";
        assert_eq!(
            redact_credentials(uri),
            "postgresql://envizon:****@:5432/envizon?host=db"
        );
    }

    #[test]
    fn redacts_password_containing_at_sign() {
        let uri = "postgresql://envizon:p@ss@:5432/envizon?host=db";
        let redacted = redact_credentials(uri);
        assert_eq!(redacted, "postgresql://envizon:****@:5432/envizon?host=db");
        assert!(!redacted.contains("p@ss"));
        assert!(!redacted.contains("ss@"));
    }

    #[test]
    fn leaves_uri_without_credentials_alone() {
        assert_eq!(redact_credentials("postgresql:///envizon"), "postgresql:///envizon");
        assert_eq!(redact_credentials("not a uri"), "not a uri");
    }

    #[test]
    fn formats_byte_sizes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2_000), "2KB");
        assert_eq!(format_bytes(3_500_000), "4MB");
        assert_eq!(format_bytes(1_500_000_000), "1.5GB");
    }

    #[test]
    fn parses_exclusion_lists() {
        assert_eq!(
            parse_exclusions("users, ar_internal_metadata,,"),
            vec!["users", "ar_internal_metadata"]
        );
        assert!(parse_exclusions("").is_empty());
    }
}
