//! `{field}` placeholder substitution

use crate::adapter::TemplateError;
use std::collections::BTreeMap;

/// Replaces each `{name}` in `template` with `fields[name]`
///
/// Values are percent-encoded so each one stays inside the path segment it
/// was placed in. Empty values and the dot segments `.` and `..` are refused,
/// since no encoding keeps them from changing the resolved path.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use ingest_engine::adapter::template::render;
///
/// let mut fields = BTreeMap::new();
/// fields.insert("orderId".to_string(), "A1".to_string());
/// assert_eq!(render("/orders/{orderId}", &fields).unwrap(), "/orders/A1");
/// ```
pub fn render(template: &str, fields: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| TemplateError::Unterminated {
            template: template.to_string(),
        })?;

        let name = after[..close].trim();
        let value = fields
            .get(name)
            .ok_or_else(|| TemplateError::MissingField {
                field: name.to_string(),
            })?;
        if value.is_empty() || value == "." || value == ".." {
            return Err(TemplateError::UnsafeValue {
                field: name.to_string(),
                value: value.clone(),
            });
        }
        rendered.push_str(&urlencoding::encode(value));

        rest = &after[close + 1..];
    }
    rendered.push_str(rest);

    Ok(rendered)
}
