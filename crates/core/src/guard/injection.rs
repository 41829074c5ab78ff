//! Heuristic injection detection.
//!
//! This is a blocklist, not a parser. Legitimate text that happens to contain
//! a listed token (a product called "Select Pens", say) is flagged too.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::RegexSet;

/// Maximum number of URI-decoding passes applied by
/// [`check_for_malicious_input`]. Covers double and triple encoding.
const MAX_DECODE_PASSES: usize = 3;

/// Family of a detected hostile pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatKind {
    /// SQL keywords, quote tautologies and comment markers.
    Sql,
    /// HTML tags, event handlers and script URI schemes.
    Markup,
    /// Relative path traversal and well-known system paths.
    PathTraversal,
    /// Names of functions commonly abused in payloads.
    DangerousCall,
    /// Embedded NUL bytes, raw or encoded.
    NullByte,
}

impl fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sql => "sql",
            Self::Markup => "markup",
            Self::PathTraversal => "path_traversal",
            Self::DangerousCall => "dangerous_call",
            Self::NullByte => "null_byte",
        };
        f.write_str(name)
    }
}

static SQL_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"'\s*(or|and)\s*'",
        r"'\s*(or|and)\s+[\w']+\s*=",
        r"\b(or|and)\s+\d+\s*=\s*\d+",
        r"--",
        r"/\*|\*/",
        r";\s*(select|insert|update|delete|drop|alter|create|truncate|exec)\b",
        r"\b(select|insert|update|delete|drop|union|alter|truncate|exec)\b",
        r"'\s*;",
    ])
    .expect("Invalid regex")
});

static MARKUP_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"<\s*/?\s*script",
        r"<\s*/?\s*(iframe|object|embed|img|svg|link|style|meta|body|form|input|base|frame)\b",
        r"\bon[a-z]+\s*=",
        r"(javascript|vbscript|livescript)\s*:",
        r"data\s*:\s*text/html",
        r"expression\s*\(",
    ])
    .expect("Invalid regex")
});

static TRAVERSAL_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"\.\./",
        r"\.\.\\",
        r"/etc/(passwd|shadow|hosts)",
        r"c:\\windows",
    ])
    .expect("Invalid regex")
});

static CALL_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"\b(eval|alert|prompt|confirm|settimeout|setinterval|fromcharcode|atob|system|passthru|shell_exec|popen|sleep|benchmark)\s*\(",
        r"document\s*\.\s*(cookie|write|location|domain)",
        r"window\s*\.\s*(location|open)",
        r"\binnerhtml\b",
        r"\bxp_cmdshell\b",
        r"\bwaitfor\s+delay\b",
        r"\$\{[^}]*\}",
    ])
    .expect("Invalid regex")
});

/// Returns `true` if the input matches an SQL or markup injection pattern.
///
/// Input is trimmed and lower-cased before matching.
///
/// ```
/// use campus_market_core::guard::detect_injection;
///
/// assert!(detect_injection("' OR '1'='1"));
/// assert!(detect_injection("<script>alert(1)</script>"));
/// assert!(!detect_injection("Spiral Notebook"));
/// ```
#[must_use]
pub fn detect_injection(input: &str) -> bool {
    let normalized = normalize(input);
    SQL_PATTERNS.is_match(&normalized) || MARKUP_PATTERNS.is_match(&normalized)
}

/// Returns `true` if the input matches any pattern of the extended set used
/// by the product editor, either as typed or after URI decoding.
#[must_use]
pub fn check_for_malicious_input(input: &str) -> bool {
    classify(input).is_some()
}

/// Classify the input against the extended pattern set.
///
/// Returns the first matching family, checking the raw input before each
/// decoded form.
#[must_use]
pub fn classify(input: &str) -> Option<ThreatKind> {
    if input.contains('\0') {
        return Some(ThreatKind::NullByte);
    }

    let mut current = normalize(input);
    if let Some(kind) = classify_normalized(&current) {
        return Some(kind);
    }

    for _ in 0..MAX_DECODE_PASSES {
        let decoded = uri_decode(&current);
        if decoded == current {
            break;
        }
        if decoded.contains('\0') {
            return Some(ThreatKind::NullByte);
        }
        let decoded = decoded.to_lowercase();
        if let Some(kind) = classify_normalized(&decoded) {
            return Some(kind);
        }
        current = decoded;
    }

    None
}

fn classify_normalized(normalized: &str) -> Option<ThreatKind> {
    if SQL_PATTERNS.is_match(normalized) {
        Some(ThreatKind::Sql)
    } else if MARKUP_PATTERNS.is_match(normalized) {
        Some(ThreatKind::Markup)
    } else if TRAVERSAL_PATTERNS.is_match(normalized) {
        Some(ThreatKind::PathTraversal)
    } else if CALL_PATTERNS.is_match(normalized) {
        Some(ThreatKind::DangerousCall)
    } else {
        None
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Decode `%XX` escapes and `+` as a space. Invalid escapes are kept as-is and
/// invalid UTF-8 is replaced.
fn uri_decode(input: &str) -> String {
    let plus_decoded: Cow<'_, str> = if input.contains('+') {
        Cow::Owned(input.replace('+', " "))
    } else {
        Cow::Borrowed(input)
    };
    let bytes = urlencoding::decode_binary(plus_decoded.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &[&str] = &[
        "Spiral Notebook",
        "Pencil 2B",
        "Blue pens 10 pack",
        "Selection of snacks",
        "Dropbox sticker",
        "Organic Coffee",
        "abc123",
        "TI 84 Calculator",
        "",
    ];

    #[test]
    fn test_canonical_payloads_detected_by_both() {
        for payload in [
            "' OR '",
            "x' or 'a'='a",
            "<script>alert(1)</script>",
            "javascript:alert(1)",
            "JAVASCRIPT:void(0)",
        ] {
            assert!(detect_injection(payload), "{payload}");
            assert!(check_for_malicious_input(payload), "{payload}");
        }
    }

    #[test]
    fn test_plain_text_not_flagged() {
        for text in PLAIN {
            assert!(!detect_injection(text), "{text}");
            assert!(!check_for_malicious_input(text), "{text}");
        }
    }

    #[test]
    fn test_sql_markers() {
        assert!(detect_injection("1 OR 1=1"));
        assert!(detect_injection("name'; DROP TABLE products"));
        assert!(detect_injection("admin'--"));
        assert!(detect_injection("/* comment */"));
        assert!(detect_injection("UNION ALL"));
        assert_eq!(classify("select * from users"), Some(ThreatKind::Sql));
    }

    #[test]
    fn test_keyword_false_positive_is_accepted() {
        assert!(detect_injection("Select Pens"));
    }

    #[test]
    fn test_markup_markers() {
        assert!(detect_injection("<img src=x onerror=alert(1)>"));
        assert!(detect_injection("<svg/onload=x>"));
        assert!(detect_injection("a onclick = b"));
        assert!(detect_injection("data:text/html;base64,AAAA"));
        assert_eq!(classify("<iframe src=x>"), Some(ThreatKind::Markup));
    }

    #[test]
    fn test_extended_families() {
        assert!(!detect_injection("../../etc/passwd"));
        assert_eq!(
            classify("../../etc/passwd"),
            Some(ThreatKind::PathTraversal)
        );
        assert_eq!(classify("eval(payload)"), Some(ThreatKind::DangerousCall));
        assert_eq!(classify("document.cookie"), Some(ThreatKind::DangerousCall));
        assert_eq!(classify("${jndi:ldap}"), Some(ThreatKind::DangerousCall));
        assert_eq!(classify("name\0"), Some(ThreatKind::NullByte));
    }

    #[test]
    fn test_encoded_payloads() {
        assert!(!detect_injection("%3Cscript%3E"));
        assert_eq!(classify("%3Cscript%3E"), Some(ThreatKind::Markup));
        assert_eq!(classify("%27+OR+%27"), Some(ThreatKind::Sql));
        assert_eq!(classify("%252e%252e%252f"), Some(ThreatKind::PathTraversal));
        assert_eq!(classify("file%00.txt"), Some(ThreatKind::NullByte));
    }

    #[test]
    fn test_percent_sign_in_plain_text() {
        assert!(!check_for_malicious_input("50% off"));
        assert!(!check_for_malicious_input("100%"));
    }
}
