//! Normalisation of the human decision input.

/// A decision read from the decision file, after normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Resume,
    Failed,
    /// Non-empty input that maps to neither outcome. Carries the trimmed input.
    Invalid(String),
}

/// Map raw decision text to a [`Decision`].
///
/// Matching is case-insensitive on the trimmed text: `yes`/`1` resume,
/// `no`/`2` fail. Callers treat empty input as "no decision yet" before
/// reaching this function.
pub fn normalize_decision(raw: &str) -> Decision {
    let trimmed = raw.trim();
    match trimmed.to_ascii_uppercase().as_str() {
        "YES" | "1" => Decision::Resume,
        "NO" | "2" => Decision::Failed,
        _ => Decision::Invalid(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_values_are_case_insensitive() {
        for raw in ["yes", "Yes", "YES", " yes\n", "1"] {
            assert_eq!(normalize_decision(raw), Decision::Resume, "{raw:?}");
        }
    }

    #[test]
    fn failed_values_are_case_insensitive() {
        for raw in ["no", "No", "NO\n", "2"] {
            assert_eq!(normalize_decision(raw), Decision::Failed, "{raw:?}");
        }
    }

    #[test]
    fn anything_else_is_invalid() {
        assert_eq!(
            normalize_decision(" maybe "),
            Decision::Invalid("maybe".to_string())
        );
        assert_eq!(normalize_decision("3"), Decision::Invalid("3".to_string()));
        assert_eq!(
            normalize_decision("yes please"),
            Decision::Invalid("yes please".to_string())
        );
    }
}
