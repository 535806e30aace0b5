//! Notification templates with `{{key}}` placeholders.
//!
//! A request's `template` either names a registered template or is itself a
//! literal body. Placeholders resolve against the request's `data` object;
//! dotted keys walk nested objects and unknown keys render empty.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Built-in template names.
pub const TEMPLATE_HEALTH_ALERT: &str = "health_alert";
pub const TEMPLATE_DIAGNOSTIC_ISSUE: &str = "diagnostic_issue";
pub const TEMPLATE_AGGREGATED_DIGEST: &str = "aggregated_digest";

/// Regex pattern matching `{{ key }}` tokens.
pub const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_.]*)\s*\}\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// A rendered subject/body pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        let mut registry = Self {
            templates: HashMap::new(),
        };
        registry.register(
            TEMPLATE_HEALTH_ALERT,
            Template::new(
                "Health {{rating}} for {{account_id}}",
                "Account {{account_id}} health score is {{score}} ({{rating}}), \
                 changed {{change}} since the previous check.",
            ),
        );
        registry.register(
            TEMPLATE_DIAGNOSTIC_ISSUE,
            Template::new(
                "{{severity}} {{issue_type}} on {{account_id}}",
                "{{description}}\nObserved {{observed_value}} against threshold {{threshold}}.\n\
                 Suggested action: {{action}}",
            ),
        );
        registry.register(
            TEMPLATE_AGGREGATED_DIGEST,
            Template::new(
                "{{count}} notifications for {{aggregation_key}}",
                "{{count}} notifications were combined for {{aggregation_key}} \
                 between {{first_at}} and {{last_at}}.",
            ),
        );
        registry
    }
}

impl TemplateRegistry {
    pub fn register(&mut self, name: impl Into<String>, template: Template) {
        self.templates.insert(name.into(), template);
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Render by name, falling back to treating `template` as a literal body.
    /// An empty template renders the notification type as both parts.
    pub fn render(&self, template: &str, notification_type: &str, data: &Value) -> Rendered {
        match self.get(template) {
            Some(t) => Rendered {
                subject: fill(&t.subject, data),
                body: fill(&t.body, data),
            },
            None if template.trim().is_empty() => Rendered {
                subject: notification_type.to_string(),
                body: notification_type.to_string(),
            },
            None => Rendered {
                subject: notification_type.to_string(),
                body: fill(template, data),
            },
        }
    }
}

/// Substitute every placeholder in `text` from `data`.
pub fn fill(text: &str, data: &Value) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures<'_>| lookup(data, &caps[1]))
        .into_owned()
}

fn lookup(data: &Value, path: &str) -> String {
    let mut current = data;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fills_strings_numbers_and_nested_keys() {
        let data = json!({ "name": "acc-1", "score": 42, "meta": { "region": "eu" } });
        assert_eq!(
            fill("{{name}} scored {{ score }} in {{meta.region}}", &data),
            "acc-1 scored 42 in eu"
        );
    }

    #[test]
    fn unknown_keys_render_empty() {
        assert_eq!(fill("[{{missing}}]", &json!({})), "[]");
    }

    #[test]
    fn registered_template_renders_subject_and_body() {
        let registry = TemplateRegistry::default();
        let rendered = registry.render(
            TEMPLATE_DIAGNOSTIC_ISSUE,
            "diagnostic.slow_scan",
            &json!({
                "severity": "HIGH",
                "issue_type": "slow_scan",
                "account_id": "acc-1",
                "description": "Scans are slow",
                "observed_value": 95000,
                "threshold": 45000,
                "action": "Check the network",
            }),
        );
        assert_eq!(rendered.subject, "HIGH slow_scan on acc-1");
        assert!(rendered.body.starts_with("Scans are slow\nObserved 95000 against threshold 45000."));
    }

    #[test]
    fn unregistered_template_is_a_literal_body() {
        let registry = TemplateRegistry::default();
        let rendered = registry.render("Ping {{who}}", "custom.ping", &json!({ "who": "ops" }));
        assert_eq!(rendered.subject, "custom.ping");
        assert_eq!(rendered.body, "Ping ops");
    }

    #[test]
    fn empty_template_falls_back_to_type() {
        let registry = TemplateRegistry::default();
        let rendered = registry.render("", "custom.ping", &json!({}));
        assert_eq!(rendered.body, "custom.ping");
    }
}
