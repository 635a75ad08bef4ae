//! Distinguished Name helpers.
//!
//! DN strings reach us in several shapes: RFC 4514 style from
//! `x509-parser` (`C=DE, O=Example, CN=svc`), OpenSSL "slash" style from
//! proxies (`/C=DE/O=Example/CN=svc`), and whatever operators type into
//! trust lists. Comparison is therefore done on token sets rather than on
//! the raw strings.
//!
//! None of these functions fail: malformed input degrades to an empty or
//! partial result.

use serde::Serialize;

/// Split a DN into trimmed `KEY=value` tokens.
///
/// Commas and slashes are both treated as separators, and a leading
/// separator (slash style) is ignored. Empty tokens are dropped.
#[must_use]
pub fn tokenize(dn: &str) -> Vec<String> {
    let trimmed = dn.trim();
    let body = trimmed
        .strip_prefix('/')
        .or_else(|| trimmed.strip_prefix(','))
        .unwrap_or(trimmed);

    body.split([',', '/'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Compare two token lists ignoring order.
///
/// Lists of different length never match.
#[must_use]
pub fn tokens_match(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut left: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut right: Vec<&str> = b.iter().map(String::as_str).collect();
    left.sort_unstable();
    right.sort_unstable();
    left == right
}

/// Order-insensitive DN equality.
#[must_use]
pub fn dn_matches(a: &str, b: &str) -> bool {
    let left = tokenize(a);
    !left.is_empty() && tokens_match(&left, &tokenize(b))
}

/// True if `dn` matches any entry of `candidates`.
pub fn matches_any<'a, I>(dn: &str, candidates: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    candidates.into_iter().any(|candidate| dn_matches(dn, candidate))
}

/// Canonical lookup key: sorted tokens joined by `,`.
///
/// Two DNs that [`dn_matches`] considers equal share the same key.
#[must_use]
pub fn normalize(dn: &str) -> String {
    let mut tokens = tokenize(dn);
    tokens.sort_unstable();
    tokens.join(",")
}

/// Structured view of a DN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedDn {
    /// The input, unchanged.
    pub dn: String,
    /// Common Name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cn: Option<String>,
    /// Organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub o: Option<String>,
    /// Organizational Unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ou: Option<String>,
    /// Country
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
    /// Locality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l: Option<String>,
    /// State or province
    #[serde(skip_serializing_if = "Option::is_none")]
    pub st: Option<String>,
}

/// Parse a comma-separated DN into its well-known fields.
///
/// A comma only separates attributes when it is followed by `KEY=`, so
/// values such as `O=Example, Inc.` survive intact. Values may contain `=`.
/// Attributes other than CN, O, OU, C, L and ST are dropped; the first
/// occurrence of a repeated key wins.
#[must_use]
pub fn parse(dn: &str) -> ParsedDn {
    let mut parsed = ParsedDn {
        dn: dn.to_owned(),
        ..ParsedDn::default()
    };

    for part in split_attributes(dn) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().to_owned();
        let slot = match key.trim().to_ascii_uppercase().as_str() {
            "CN" => &mut parsed.cn,
            "O" => &mut parsed.o,
            "OU" => &mut parsed.ou,
            "C" => &mut parsed.c,
            "L" => &mut parsed.l,
            "ST" => &mut parsed.st,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    parsed
}

/// Split on commas that introduce a new `KEY=` attribute.
fn split_attributes(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;

    for (idx, ch) in dn.char_indices() {
        if ch == ',' && starts_with_key(&dn[idx + 1..]) {
            parts.push(dn[start..idx].trim());
            start = idx + 1;
        }
    }
    parts.push(dn[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// `rest` (after optional whitespace) begins with `KEY=`.
fn starts_with_key(rest: &str) -> bool {
    let rest = rest.trim_start();
    let key_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '.')
        .count();
    key_len > 0 && rest[key_len..].starts_with('=')
}
