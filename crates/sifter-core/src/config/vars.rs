//! Environment variable interpolation for engine config files.
//!
//! Recognized forms:
//! - `$NAME` / `${NAME}` - required variable
//! - `${NAME:-fallback}` - fallback when unset or empty
//! - `${NAME-fallback}` - fallback only when unset
//! - `$$` - a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$(?:
            (?P<escape>\$)
            |
            \{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)
                (?:(?P<op>:?-)(?P<fallback>[^}]*))?
            \}
            |
            (?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        )
        ",
    )
    .expect("placeholder pattern is a valid regex")
});

/// Output of [`interpolate`].
#[derive(Debug)]
pub struct Interpolated {
    /// Text with every resolvable placeholder substituted.
    pub text: String,
    /// One message per placeholder that could not be resolved.
    pub problems: Vec<String>,
}

impl Interpolated {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Substitute environment variables into `input`.
///
/// Unresolvable placeholders are left in place and reported, so a config with
/// several missing variables reports all of them in one pass.
pub fn interpolate(input: &str) -> Interpolated {
    let mut problems = Vec::new();
    let text = PLACEHOLDER
        .replace_all(input, |caps: &Captures| resolve(caps, &mut problems))
        .into_owned();
    Interpolated { text, problems }
}

fn resolve(caps: &Captures, problems: &mut Vec<String>) -> String {
    let original = &caps[0];
    if caps.name("escape").is_some() {
        return "$".to_string();
    }

    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return original.to_string();
    };
    let name = name.as_str();
    let op = caps.name("op").map(|m| m.as_str());
    let fallback = caps.name("fallback").map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            problems.push(format!("environment variable '{name}' contains a line break"));
            original.to_string()
        }
        Ok(value) if value.is_empty() && op == Some(":-") => {
            fallback.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match fallback {
            Some(fallback) => fallback.to_string(),
            None => {
                problems.push(format!("environment variable '{name}' is not set"));
                original.to_string()
            }
        },
    }
}
