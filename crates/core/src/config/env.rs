//! `${VAR}` expansion for string configuration values.

use regex_lite::Regex;

const ENV_PATTERN: &str = r"\$\{([^}]+)\}";

/// Replace every `${VAR}` with the variable's value. Unset variables are
/// left verbatim so the failure surfaces where the value is parsed.
pub fn expand_env(value: &str) -> anyhow::Result<String> {
    let re = Regex::new(ENV_PATTERN)?;
    Ok(re
        .replace_all(value, |caps: &regex_lite::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned())
}

/// Whether the value still contains an unexpanded `${VAR}`.
pub fn has_placeholder(value: &str) -> bool {
    value.contains("${")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_set_variable() {
        std::env::set_var("SCENARIO_TEST_RPC_HOST", "127.0.0.1");
        let expanded = expand_env("http://${SCENARIO_TEST_RPC_HOST}:8545").unwrap();
        assert_eq!(expanded, "http://127.0.0.1:8545");
    }

    #[test]
    fn test_unset_variable_is_kept() {
        let expanded = expand_env("${SCENARIO_TEST_DEFINITELY_UNSET}").unwrap();
        assert_eq!(expanded, "${SCENARIO_TEST_DEFINITELY_UNSET}");
        assert!(has_placeholder(&expanded));
    }

    #[test]
    fn test_plain_value_untouched() {
        assert_eq!(expand_env("memory").unwrap(), "memory");
    }
}
