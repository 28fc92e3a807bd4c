//! `*` wildcard matching shared by env blocklists and timeout overrides

/// Match `text` against a pattern where `*` stands for any run of characters
pub(crate) fn wildcard_match(pattern: &str, text: &str, ignore_case: bool) -> bool {
    if ignore_case {
        return wildcard_match(&pattern.to_uppercase(), &text.to_uppercase(), false);
    }

    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = (parts[0], parts[parts.len() - 1]);

    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];

    for middle in &parts[1..parts.len() - 1] {
        if middle.is_empty() {
            continue;
        }
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::wildcard_match;

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("AWS_*", "AWS_SECRET_ACCESS_KEY", false));
        assert!(wildcard_match("*_KEY", "OPENAI_API_KEY", false));
        assert!(wildcard_match("*TOKEN*", "GH_TOKEN_RO", false));
        assert!(wildcard_match("npm * --watch", "npm run build --watch", false));
        assert!(wildcard_match("*", "", false));
        assert!(!wildcard_match("*_KEY", "KEYBOARD", false));
        assert!(!wildcard_match("a*b*c", "acb", false));
        assert!(!wildcard_match("PATH", "PATH2", false));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(wildcard_match("*secret*", "MY_SECRET_VALUE", true));
        assert!(!wildcard_match("*secret*", "MY_SECRET_VALUE", false));
    }
}
