//! Helpers for reading configuration from environment variables.

/// Interpret a string value such as "1" or "no" as a boolean.
///
/// Returns `None` if the value is not recognized.
pub fn str_as_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
///
/// Unrecognized values are logged and treated as `default`.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => str_as_bool(&value).unwrap_or_else(|| {
            tracing::warn!(var = name, value = %value, "unrecognized boolean value");
            default
        }),
        Err(_) => default,
    }
}

/// Read a non-negative integer from an environment variable.
///
/// Unparseable values are logged and treated as `default`.
pub fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %value, "unrecognized integer value");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::str_as_bool;

    #[test]
    fn test_str_as_bool() {
        #[derive(Debug)]
        struct Case {
            value: &'static str,
            expected: Option<bool>,
        }

        let cases = [
            Case {
                value: "1",
                expected: Some(true),
            },
            Case {
                value: "Yes",
                expected: Some(true),
            },
            Case {
                value: "off",
                expected: Some(false),
            },
            Case {
                value: "0",
                expected: Some(false),
            },
            Case {
                value: "maybe",
                expected: None,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(str_as_bool(case.value), case.expected);
        });
    }
}
