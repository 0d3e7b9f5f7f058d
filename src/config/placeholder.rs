//! `${NAME}` / `${NAME:default}` substitution for configuration values

/// Replace placeholders using `lookup`
///
/// A placeholder whose name `lookup` cannot resolve falls back to its default;
/// without a default it is left in place verbatim. Unterminated `${` is kept as text.
pub fn resolve_placeholders<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name.trim(), Some(default)),
            None => (body.trim(), None),
        };

        match (lookup(name), default) {
            (Some(found), _) => out.push_str(&found),
            (None, Some(default)) => out.push_str(default),
            (None, None) => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Replace placeholders from the process environment
pub fn resolve_env_placeholders(value: &str) -> String {
    resolve_placeholders(value, |name| std::env::var(name).ok())
}
