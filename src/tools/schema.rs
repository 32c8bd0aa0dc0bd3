//! 工具与结构化输出的 JSON Schema（schemars 生成）
//!
//! 子 schema 全部内联，不输出 `$schema` / `title` / `definitions`，以便直接放进 OpenAI function 格式。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Key;

/// 生成类型 T 的参数 schema（object）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
    if let Value::Object(map) = &mut value {
        map.remove("title");
        map.remove("description");
        map.remove("definitions");
        map.entry("properties").or_insert_with(|| json!({}));
    }
    value
}

/// OpenAI function 格式
pub fn function_schema(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ElementArgs {
    /// Element identifier (ID)
    pub id: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TypeArgs {
    /// Element identifier (ID)
    pub id: u32,
    /// Text to type into an element
    pub text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SelectArgs {
    /// Element identifier (ID)
    pub id: u32,
    /// Option to select
    pub option: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PressKeyArgs {
    /// Key to press.
    pub key: Key,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DragAndDropArgs {
    /// Identifier (ID) of element to drag
    pub from_id: u32,
    /// Identifier (ID) of element to drop onto
    pub to_id: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadArgs {
    /// Element identifier (ID) of the button that opens the file chooser
    pub id: u32,
    /// Absolute file paths to upload
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NavigateToUrlArgs {
    /// Provided url (str)
    pub url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteJavascriptArgs {
    /// JavaScript code to execute
    pub script: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WaitArgs {
    /// Seconds to wait (1-30)
    pub seconds: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_schema_shape() {
        let schema = parameters_schema::<TypeArgs>();
        assert_eq!(schema["type"], "object");
        assert_eq!(
            schema["properties"]["text"]["description"],
            "Text to type into an element"
        );
        assert_eq!(schema["properties"]["id"]["type"], "integer");
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("id")));
        assert!(required.contains(&json!("text")));
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
    }

    #[test]
    fn test_key_enum_is_inlined() {
        let schema = parameters_schema::<PressKeyArgs>();
        let key = &schema["properties"]["key"];
        assert!(key.get("$ref").is_none());
        let rendered = key.to_string();
        for name in ["Backspace", "Enter", "Escape", "Tab"] {
            assert!(rendered.contains(name));
        }
    }

    #[test]
    fn test_no_args_has_empty_properties() {
        let schema = parameters_schema::<NoArgs>();
        assert_eq!(schema["properties"], json!({}));
    }
}
