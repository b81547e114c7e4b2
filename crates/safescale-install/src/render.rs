//! Script template rendering.
//!
//! Step scripts carry `{{Name}}` placeholders filled from the variable
//! map at execution time. Rendering fails on an unknown placeholder so a
//! half-rendered script never reaches a host.

use std::collections::HashMap;

use safescale_core::{Error, Result};

/// Substitute `{{Name}}` placeholders in `template`.
///
/// # Errors
///
/// Returns `Syntax` on an unknown or unterminated placeholder.
pub fn render(template: &str, variables: &HashMap<String, String>) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(Error::syntax("unterminated placeholder in script template"));
        };
        let name = after[..end].trim();
        match variables.get(name) {
            Some(value) => output.push_str(value),
            None => {
                return Err(Error::syntax(format!(
                    "no value for placeholder '{name}' in script template"
                )))
            }
        }
        rest = &after[end + 2..];
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_repeated_and_spaced_placeholders() {
        let vars = HashMap::from([
            ("HostIP".to_string(), "10.0.0.4".to_string()),
            ("Hostname".to_string(), "c1-node-2".to_string()),
        ]);
        let script = "echo {{Hostname}} {{ HostIP }} {{Hostname}}";
        assert_eq!(
            render(script, &vars).unwrap(),
            "echo c1-node-2 10.0.0.4 c1-node-2"
        );
    }

    #[test]
    fn unknown_placeholder_is_a_syntax_error() {
        let err = render("{{Nope}}", &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), safescale_core::ErrorKind::Syntax);
    }

    #[test]
    fn literal_text_passes_through() {
        assert_eq!(render("plain $VAR text", &HashMap::new()).unwrap(), "plain $VAR text");
    }
}
