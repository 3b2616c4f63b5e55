//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` or `${VAR}` - value of VAR, error if unset
//! - `${VAR:-default}` - default when VAR is unset or empty
//! - `${VAR-default}` - default only when VAR is unset
//! - `$$` - a literal `$`
//!
//! Shard addresses are the usual candidates, e.g. `idfa: ${IDFA_ADDR:-127.0.0.1:33013}`.

use std::env;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?: (?P<op>:?-) (?P<default>[^}]*) )?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// One message per variable that could not be resolved.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if every reference was resolved.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in `input`.
///
/// Errors are accumulated rather than returned on the first miss, so a config
/// with several unset variables reports all of them at once. Unresolved
/// references are left in the text verbatim.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| match resolve(caps) {
            Ok(value) => value,
            Err(message) => {
                errors.push(message);
                caps[0].to_string()
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures) -> Result<String, String> {
    if &caps[0] == "$$" {
        return Ok("$".to_string());
    }

    let name = caps
        .name("braced")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let op = caps.name("op").map(|m| m.as_str());
    let default = caps.name("default").map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains('\n') || value.contains('\r') => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() && op == Some(":-") => {
            Ok(default.unwrap_or_default().to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => default
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}
