//! Response body templating.
//!
//! Canned responses flagged with `is_template` are rendered through handlebars
//! with the inbound query string as the root context. Every query parameter
//! maps to the ordered list of its values, so the supported constructs are:
//!
//! - `{{name.[0]}}` - first value of a parameter
//! - `{{#each name}}{{this}} {{/each}}` - iteration over all values
//! - `{{#if name}}...{{/if}}` - presence check
//!
//! # Example
//!
//! A GET response body of `hello {{#each name}}{{this}} {{/each}}` answered to
//! `GET /b?name=Adam&name=Dan` renders as `hello Adam Dan `.

use handlebars::Handlebars;
use serde_json::{Map, Value};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Handlebars<'static>> = OnceLock::new();

fn registry() -> &'static Handlebars<'static> {
    REGISTRY.get_or_init(|| {
        let mut hb = Handlebars::new();
        // bodies are arbitrary payloads, not HTML
        hb.register_escape_fn(handlebars::no_escape);
        hb.set_strict_mode(false);
        hb
    })
}

/// Error raised when a response body fails to parse or render as a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid response template: {0}")]
    Parse(#[from] Box<handlebars::TemplateError>),
    #[error("failed to render response template: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// Validates that `body` parses as a template.
pub fn validate_template(body: &str) -> Result<(), TemplateError> {
    handlebars::Template::compile(body).map_err(|e| TemplateError::Parse(Box::new(e)))?;
    Ok(())
}

/// Renders `body` with the parameters of `query` as root context.
pub fn render_template(body: &str, query: &str) -> Result<String, TemplateError> {
    let context = query_context(query);
    Ok(registry().render_template(body, &context)?)
}

/// Parses a raw query string into a name -> ordered values object.
fn query_context(query: &str) -> Value {
    let mut context = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let values = context
            .entry(key.into_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = values {
            items.push(Value::String(value.into_owned()));
        }
    }
    Value::Object(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_each() {
        let body = "hello {{#each name}}{{this}} {{/each}}";
        let result = render_template(body, "name=Adam&name=Dan").unwrap();
        assert_eq!(result, "hello Adam Dan ");
    }

    #[test]
    fn test_render_field() {
        let result = render_template("user: {{user.[0]}}", "user=tester&age=24").unwrap();
        assert_eq!(result, "user: tester");
    }

    #[test]
    fn test_render_missing_parameter() {
        let result = render_template("value: {{#each nope}}{{this}}{{/each}}", "a=b").unwrap();
        assert_eq!(result, "value: ");
    }

    #[test]
    fn test_render_no_escaping() {
        let result = render_template("<b>{{v.[0]}}</b>", "v=a%26b").unwrap();
        assert_eq!(result, "<b>a&b</b>");
    }

    #[test]
    fn test_render_decodes_query() {
        let result = render_template("{{city.[0]}}", "city=New%20York").unwrap();
        assert_eq!(result, "New York");
    }

    #[test]
    fn test_validate_template() {
        assert!(validate_template("hello {{#each name}}{{this}} {{/each}}").is_ok());
        assert!(validate_template("plain body").is_ok());
        assert!(validate_template("broken {{#each name}}{{this}}").is_err());
    }
}
