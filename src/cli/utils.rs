use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::cli::OutputFormat;

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = Map::new();
            response.insert("success".to_string(), json!(true));
            response.insert("message".to_string(), json!(message));

            match data {
                Some(Value::Object(fields)) => response.extend(fields),
                Some(other) => {
                    response.insert("data".to_string(), other);
                }
                None => {}
            }

            println!("{}", serde_json::to_string_pretty(&Value::Object(response))?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Print a record as JSON, or as aligned `key: value` lines in text mode
pub fn output_record<T: Serialize>(output_format: &OutputFormat, title: &str, record: &T) -> anyhow::Result<()> {
    let value = serde_json::to_value(record)?;
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("{}", title);
            println!("{}", "-".repeat(title.len().max(20)));
            for (key, field) in text_fields(&value) {
                println!("{:<24} {}", key, field);
            }
        }
    }
    Ok(())
}

/// Flatten the top level of a JSON object for text output. Nested objects
/// and arrays are rendered as compact JSON.
pub fn text_fields(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, field)| {
                let rendered = match field {
                    Value::String(s) => s.clone(),
                    Value::Null => "-".to_string(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect(),
        other => vec![("value".to_string(), other.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_fields_render_scalars_plainly() {
        let fields = text_fields(&json!({ "name": "Acme", "credits": 100, "trialEndsAt": null }));
        assert!(fields.contains(&("name".to_string(), "Acme".to_string())));
        assert!(fields.contains(&("credits".to_string(), "100".to_string())));
        assert!(fields.contains(&("trialEndsAt".to_string(), "-".to_string())));
    }

    #[test]
    fn text_fields_wrap_non_objects() {
        assert_eq!(text_fields(&json!(3)), vec![("value".to_string(), "3".to_string())]);
    }
}
