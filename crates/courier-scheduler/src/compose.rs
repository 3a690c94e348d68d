//! Email composition: the semicolon content convention and positional
//! `{{i}}` placeholder substitution.

use courier_core::error::{CourierError, Result};
use courier_core::types::EmailTemplateParts;

pub const RECIPIENT_REQUIRED: &str = "content must contain at least recipient email";

/// Task content split into its recipient and ordered template variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContent {
    pub recipient: String,
    pub vars: Vec<String>,
}

/// Parse `"<recipient>;<var1>;<var2>;…"`. Every field is trimmed.
pub fn parse_content(content: &str) -> Result<ParsedContent> {
    let mut fields = content.split(';').map(str::trim);
    let recipient = fields.next().unwrap_or_default();
    if recipient.is_empty() {
        return Err(CourierError::Validation(RECIPIENT_REQUIRED.into()));
    }
    Ok(ParsedContent {
        recipient: recipient.to_string(),
        vars: fields.map(String::from).collect(),
    })
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEmail {
    pub subject: String,
    pub body: String,
}

/// Fill `{{1}}`, `{{2}}`, … in subject and body with `vars` (1-indexed).
/// Placeholders without a variable stay literal; extra variables are ignored.
/// No escaping is applied.
pub fn compose(template: &EmailTemplateParts, vars: &[String]) -> ComposedEmail {
    ComposedEmail {
        subject: substitute(&template.subject, vars),
        body: substitute(&template.body, vars),
    }
}

/// Single left-to-right pass, so a variable containing `{{n}}` is never
/// expanded a second time.
fn substitute(text: &str, vars: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let replacement = after_open.find("}}").and_then(|end| {
            let index = placeholder_index(&after_open[..end])?;
            Some((vars.get(index - 1)?, end))
        });

        match replacement {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after_open[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}

/// `"1"`, `"2"`, …: ASCII digits with no sign, padding or leading zero.
fn placeholder_index(token: &str) -> Option<usize> {
    let bytes = token.as_bytes();
    if bytes.first().is_none_or(|b| !(b'1'..=b'9').contains(b))
        || !bytes.iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(subject: &str, body: &str) -> EmailTemplateParts {
        EmailTemplateParts {
            subject: subject.into(),
            body: body.into(),
        }
    }

    fn vars(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_content_trims_fields() {
        let parsed = parse_content(" a@b.com ; Alice ;42").unwrap();
        assert_eq!(parsed.recipient, "a@b.com");
        assert_eq!(parsed.vars, vars(&["Alice", "42"]));
    }

    #[test]
    fn test_parse_content_recipient_only() {
        let parsed = parse_content("a@b.com").unwrap();
        assert_eq!(parsed.recipient, "a@b.com");
        assert!(parsed.vars.is_empty());
    }

    #[test]
    fn test_parse_content_missing_recipient() {
        for content in ["", "   ", ";Alice;42", " ;x"] {
            let err = parse_content(content).unwrap_err();
            assert_eq!(err.to_string(), RECIPIENT_REQUIRED, "{content:?}");
        }
    }

    #[test]
    fn test_compose_body() {
        let email = compose(
            &template("Welcome {{1}}", "Hi {{1}}, code {{2}}"),
            &vars(&["Alice", "42"]),
        );
        assert_eq!(email.subject, "Welcome Alice");
        assert_eq!(email.body, "Hi Alice, code 42");
    }

    #[test]
    fn test_unmatched_placeholders_stay_literal() {
        let email = compose(
            &template("s", "Hi {{1}}, code {{2}}, {{x}} {{0}}"),
            &vars(&["Alice"]),
        );
        assert_eq!(email.body, "Hi Alice, code {{2}}, {{x}} {{0}}");
    }

    #[test]
    fn test_only_canonical_indices_are_placeholders() {
        let email = compose(
            &template("s", "{{+1}} {{01}} {{ 1}} {{1 }} {{1}}"),
            &vars(&["Alice"]),
        );
        assert_eq!(email.body, "{{+1}} {{01}} {{ 1}} {{1 }} Alice");
    }

    #[test]
    fn test_extra_variables_ignored() {
        let email = compose(&template("s", "Hi {{1}}"), &vars(&["Alice", "unused"]));
        assert_eq!(email.body, "Hi Alice");
    }

    #[test]
    fn test_no_escaping_and_no_reexpansion() {
        let email = compose(
            &template("s", "<b>{{1}}</b> {{2}}"),
            &vars(&["{{2}} & <i>", "x"]),
        );
        assert_eq!(email.body, "<b>{{2}} & <i></b> x");
    }

    #[test]
    fn test_double_digit_placeholders() {
        let values: Vec<String> = (1..=11).map(|i| format!("v{i}")).collect();
        let email = compose(&template("s", "{{1}}-{{10}}-{{11}}"), &values);
        assert_eq!(email.body, "v1-v10-v11");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let email = compose(&template("s", "Hi {{1"), &vars(&["Alice"]));
        assert_eq!(email.body, "Hi {{1");
    }

    #[test]
    fn test_all_placeholders_filled() {
        for n in 1..=6 {
            let body: String = (1..=n).map(|i| format!("[{{{{{i}}}}}]")).collect();
            let values: Vec<String> = (1..=n).map(|i| format!(" value{i} ")).collect();
            let content = std::iter::once("to@x.com".to_string())
                .chain(values.iter().cloned())
                .collect::<Vec<_>>()
                .join(";");

            let parsed = parse_content(&content).unwrap();
            let email = compose(&template("s", &body), &parsed.vars);

            for i in 1..=n {
                assert!(!email.body.contains(&format!("{{{{{i}}}}}")));
                assert!(email.body.contains(&format!("[value{i}]")));
            }
        }
    }
}
