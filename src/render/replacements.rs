//! Personalization tokens such as `%%{first_name}%%` or
//! `%%{first_name, "there"}%%`.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::recipients::MergeFields;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementFormat {
    Html,
    Plaintext,
}

/// The closed set of member fields a token can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeField {
    FirstName,
    Name,
    Uuid,
    Email,
}

impl MergeField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "first_name" => Some(MergeField::FirstName),
            "name" => Some(MergeField::Name),
            "uuid" => Some(MergeField::Uuid),
            "email" => Some(MergeField::Email),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeField::FirstName => "first_name",
            MergeField::Name => "name",
            MergeField::Uuid => "uuid",
            MergeField::Email => "email",
        }
    }

    fn value(&self, fields: &MergeFields) -> String {
        match self {
            MergeField::FirstName => fields.first_name().unwrap_or_default().to_string(),
            MergeField::Name => fields.name.clone().unwrap_or_default(),
            MergeField::Uuid => fields.uuid.to_string(),
            MergeField::Email => fields.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub format: ReplacementFormat,
    /// The token exactly as it appears in the body.
    pub token: String,
    pub field: MergeField,
    pub fallback: Option<String>,
    /// Recipient-variable key the provider substitutes.
    pub key: String,
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"%%\{(\w+?)(?:,? *(?:"|&quot;)(.*?)(?:"|&quot;))?\}%%"#)
            .expect("replacement token pattern is valid")
    })
}

/// One replacement per distinct token per format, html first. Tokens naming
/// an unsupported field are ignored.
pub fn parse_replacements(html: &str, plaintext: &str) -> Vec<Replacement> {
    let mut replacements: Vec<Replacement> = Vec::new();
    let mut fallback_keys: Vec<(MergeField, String, String)> = Vec::new();

    for (format, body) in [
        (ReplacementFormat::Html, html),
        (ReplacementFormat::Plaintext, plaintext),
    ] {
        for caps in token_regex().captures_iter(body) {
            let token = &caps[0];
            if replacements.iter().any(|r| r.format == format && r.token == token) {
                continue;
            }
            let Some(field) = MergeField::parse(&caps[1]) else {
                continue;
            };
            let fallback = caps.get(2).map(|m| m.as_str().to_string());

            let key = match &fallback {
                None => format!("member_{}", field.as_str()),
                Some(fb) => match fallback_keys.iter().find(|(f, v, _)| *f == field && v == fb) {
                    Some((_, _, key)) => key.clone(),
                    None => {
                        let key = format!("member_{}_{}", field.as_str(), fallback_keys.len() + 1);
                        fallback_keys.push((field, fb.clone(), key.clone()));
                        key
                    }
                },
            };

            replacements.push(Replacement {
                format,
                token: token.to_string(),
                field,
                fallback,
                key,
            });
        }
    }

    replacements
}

/// Swaps each token of `format` for the provider's placeholder syntax.
pub fn apply_placeholders(
    body: &str,
    format: ReplacementFormat,
    replacements: &[Replacement],
    placeholder: impl Fn(&str) -> String,
) -> String {
    replacements
        .iter()
        .filter(|r| r.format == format)
        .fold(body.to_string(), |acc, r| {
            acc.replace(&r.token, &placeholder(&r.key))
        })
}

/// Per-recipient values for every key referenced by `replacements`.
pub fn recipient_values(replacements: &[Replacement], fields: &MergeFields) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for r in replacements {
        if values.contains_key(&r.key) {
            continue;
        }
        let mut value = r.field.value(fields);
        if value.is_empty() {
            if let Some(fallback) = &r.fallback {
                value = fallback.clone();
            }
        }
        values.insert(r.key.clone(), value);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fields(name: Option<&str>) -> MergeFields {
        MergeFields {
            uuid: Uuid::nil(),
            email: "jamie@example.com".to_string(),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_one_replacement_per_format() {
        let replaced = parse_replacements(
            "<html>Hey %%{first_name}%%, what is up?</html>",
            "Hey %%{first_name}%%, what is up?",
        );
        assert_eq!(replaced.len(), 2);
        assert_eq!(replaced[0].format, ReplacementFormat::Html);
        assert_eq!(replaced[0].key, "member_first_name");
        assert_eq!(replaced[1].format, ReplacementFormat::Plaintext);
        assert_eq!(replaced[1].key, "member_first_name");
    }

    #[test]
    fn test_repeated_tokens_reuse_replacement() {
        let html = "<html>Hey %%{first_name}%%, %%{uuid}%% %%{first_name}%% %%{uuid}%%</html>";
        let text = "Hey %%{first_name}%%, %%{uuid}%% %%{first_name}%% %%{uuid}%%";
        let keys: Vec<_> = parse_replacements(html, text)
            .into_iter()
            .map(|r| (r.format, r.key))
            .collect();
        assert_eq!(
            keys,
            vec![
                (ReplacementFormat::Html, "member_first_name".to_string()),
                (ReplacementFormat::Html, "member_uuid".to_string()),
                (ReplacementFormat::Plaintext, "member_first_name".to_string()),
                (ReplacementFormat::Plaintext, "member_uuid".to_string()),
            ]
        );
    }

    #[test]
    fn test_unsupported_names_are_ignored() {
        let replaced = parse_replacements(
            "<html>Hey %%{last_name}%%, what is up?</html>",
            "Hey %%{age}%%, what is up?",
        );
        assert!(replaced.is_empty());
    }

    #[test]
    fn test_fallback_with_encoded_quotes() {
        let replaced = parse_replacements(
            "<p>Hi %%{first_name, &quot;there&quot;}%%</p>",
            "Hi %%{first_name, \"there\"}%%",
        );
        assert_eq!(replaced.len(), 2);
        assert_eq!(replaced[0].fallback.as_deref(), Some("there"));
        assert_eq!(replaced[0].key, "member_first_name_1");
        assert_eq!(replaced[1].key, "member_first_name_1");
    }

    #[test]
    fn test_values_use_fallback_when_empty() {
        let replaced = parse_replacements("%%{first_name, \"friend\"}%% %%{email}%%", "");

        let anonymous = recipient_values(&replaced, &fields(None));
        assert_eq!(anonymous["member_first_name_1"], "friend");
        assert_eq!(anonymous["member_email"], "jamie@example.com");

        let named = recipient_values(&replaced, &fields(Some("Jamie Lee")));
        assert_eq!(named["member_first_name_1"], "Jamie");
    }

    #[test]
    fn test_apply_placeholders() {
        let html = "<p>Hi %%{first_name}%% (%%{uuid}%%) %%{last_name}%%</p>";
        let replaced = parse_replacements(html, "");
        let out = apply_placeholders(html, ReplacementFormat::Html, &replaced, |key| {
            format!("%recipient.{}%", key)
        });
        assert_eq!(
            out,
            "<p>Hi %recipient.member_first_name% (%recipient.member_uuid%) %%{last_name}%%</p>"
        );
    }
}
