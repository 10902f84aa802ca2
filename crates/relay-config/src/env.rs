use std::sync::OnceLock;

use regex::Regex;

/// Matches `{{ env.VAR }}` and `{{ env.VAR | default("fallback") }}`
fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([a-zA-Z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("must be valid regex")
    })
}

/// Expand `{{ env.VAR }}` placeholders in a raw TOML string
///
/// An optional default can be given as `{{ env.VAR | default("fallback") }}`;
/// it is used when the variable is unset. A missing variable with no default
/// is an error. TOML comment lines are passed through untouched so commented
/// out settings never fail expansion.
pub fn expand_env(input: &str) -> Result<String, String> {
    let mut output = String::with_capacity(input.len());

    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        if line.trim_start().starts_with('#') {
            output.push_str(line);
        } else {
            expand_line(line, &mut output)?;
        }
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

fn expand_line(line: &str, output: &mut String) -> Result<(), String> {
    let mut last_end = 0;

    for captures in placeholder_re().captures_iter(line) {
        let overall = captures.get(0).expect("capture 0 always present");
        let key = &captures[1];
        let fallback = captures.get(2).map(|m| m.as_str());

        output.push_str(&line[last_end..overall.start()]);

        let Some(var_name) = key.strip_prefix("env.").filter(|rest| !rest.contains('.')) else {
            return Err(format!("only variables scoped with 'env.' are supported: `{key}`"));
        };

        match std::env::var(var_name) {
            Ok(value) => output.push_str(&value),
            Err(_) => match fallback {
                Some(default) => output.push_str(default),
                None => return Err(format!("environment variable not found: `{var_name}`")),
            },
        }

        last_end = overall.end();
    }

    output.push_str(&line[last_end..]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_without_placeholders() {
        let input = "prompt = \"hello\"\n";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn expands_set_variable() {
        temp_env::with_var("RELAY_TEST_KEY", Some("sk-123"), || {
            let result = expand_env("api_key = \"{{ env.RELAY_TEST_KEY }}\"").unwrap();
            assert_eq!(result, "api_key = \"sk-123\"");
        });
    }

    #[test]
    fn expands_several_on_one_line() {
        let vars = [("RELAY_HOST", Some("localhost")), ("RELAY_PORT", Some("5001"))];
        temp_env::with_vars(vars, || {
            let result = expand_env("base_url = \"http://{{ env.RELAY_HOST }}:{{ env.RELAY_PORT }}\"").unwrap();
            assert_eq!(result, "base_url = \"http://localhost:5001\"");
        });
    }

    #[test]
    fn missing_variable_errors() {
        temp_env::with_var_unset("RELAY_NOT_SET", || {
            let err = expand_env("api_key = \"{{ env.RELAY_NOT_SET }}\"").unwrap_err();
            assert!(err.contains("RELAY_NOT_SET"));
        });
    }

    #[test]
    fn default_covers_missing_variable() {
        temp_env::with_var_unset("RELAY_NOT_SET", || {
            let result = expand_env("timeout = \"{{ env.RELAY_NOT_SET | default(\"120s\") }}\"").unwrap();
            assert_eq!(result, "timeout = \"120s\"");
        });
    }

    #[test]
    fn set_variable_wins_over_default() {
        temp_env::with_var("RELAY_TIMEOUT", Some("30s"), || {
            let result = expand_env("timeout = \"{{ env.RELAY_TIMEOUT | default(\"120s\") }}\"").unwrap();
            assert_eq!(result, "timeout = \"30s\"");
        });
    }

    #[test]
    fn rejects_unknown_scope() {
        let err = expand_env("key = \"{{ vault.SECRET }}\"").unwrap_err();
        assert!(err.contains("only variables scoped with 'env.'"));
    }

    #[test]
    fn comment_lines_are_not_expanded() {
        temp_env::with_var_unset("RELAY_NOT_SET", || {
            let input = "  # api_key = \"{{ env.RELAY_NOT_SET }}\"\nconcurrency = 2";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
