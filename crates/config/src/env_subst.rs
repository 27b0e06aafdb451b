/// Expand `${NAME}` and `${NAME:-fallback}` placeholders from the process
/// environment.
///
/// Unset variables without a fallback are left untouched so the resulting
/// parse error (or unparsable webhook descriptor) points at the placeholder.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Placeholder expansion against an arbitrary lookup.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name).filter(|v| !v.is_empty()), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "RAINBOW_HOOK" => Some("99/tok".into()),
            "RAINBOW_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[rstest]
    #[case("webhook = \"${RAINBOW_HOOK}\"", "webhook = \"99/tok\"")]
    #[case("${RAINBOW_MISSING}", "${RAINBOW_MISSING}")]
    #[case("${RAINBOW_MISSING:-1/x}", "1/x")]
    #[case("${RAINBOW_EMPTY:-fallback}", "fallback")]
    #[case("${RAINBOW_HOOK:-ignored}", "99/tok")]
    #[case("${}", "${}")]
    #[case("cost: $5 ${RAINBOW_HOOK", "cost: $5 ${RAINBOW_HOOK")]
    #[case("a${RAINBOW_HOOK}b${RAINBOW_HOOK}c", "a99/tokb99/tokc")]
    fn expands_placeholders(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute_env_with(input, lookup), expected);
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(substitute_env("no placeholders here"), "no placeholders here");
    }
}
