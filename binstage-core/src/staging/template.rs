//! Named placeholder substitution for manifest templates.
//!
//! Supports `{name}` placeholders drawn from a fixed variable list and
//! `{{` / `}}` escapes. Nothing else is interpreted.

use crate::error::{Result, StageError};

/// Expands `{var}` placeholders in `template` using `vars`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(error(template, "unterminated placeholder"));
                }
                let value = vars
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| error(template, format!("unknown placeholder {{{}}}", name)))?;
                out.push_str(value);
            }
            '}' => return Err(error(template, "single '}' encountered")),
            _ => out.push(c),
        }
    }

    Ok(out)
}

fn error(template: &str, message: impl ToString) -> StageError {
    StageError::Template {
        template: template.to_string(),
        message: message.to_string(),
    }
}
