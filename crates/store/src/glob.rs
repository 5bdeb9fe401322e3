//! Path globs for header rules and wildcard rewrites.
//!
//! `*` matches within one path segment, `**` matches across segments.

/// Check whether `path` matches `pattern`.
pub fn matches(pattern: &str, path: &str) -> bool {
    glob(pattern.as_bytes(), path.as_bytes())
}

/// Prefix of a `/prefix/**` pattern, if the pattern has that shape.
pub fn wildcard_prefix(pattern: &str) -> Option<&str> {
    let prefix = pattern.strip_suffix("**")?;
    (prefix.ends_with('/') && !prefix.contains('*')).then_some(prefix)
}

fn glob(pattern: &[u8], input: &[u8]) -> bool {
    match pattern {
        [] => input.is_empty(),
        [b'*', b'*', rest @ ..] => (0..=input.len()).any(|i| glob(rest, &input[i..])),
        [b'*', rest @ ..] => {
            for i in 0..=input.len() {
                if glob(rest, &input[i..]) {
                    return true;
                }
                if input.get(i) == Some(&b'/') {
                    break;
                }
            }
            false
        }
        [c, rest @ ..] => input.first() == Some(c) && glob(rest, &input[1..]),
    }
}
