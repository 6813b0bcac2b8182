use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::domain::output_scripts::{ScriptError, ScriptSet, ScriptSpec};

pub const SERVICE_TYPE: &str = "pvoutput";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("service configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("service configuration type {0:?} is not \"pvoutput\"")]
    WrongType(String),
    #[error("invalid output scripts: {0}")]
    Outputs(#[from] ScriptError),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfigDocument {
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub reload: bool,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub begdate: i64,
    #[serde(default, deserialize_with = "text_or_number")]
    pub apikey: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub systemid: String,
    #[serde(default)]
    pub outputs: Option<Vec<ScriptSpec>>,
}

impl ServiceConfigDocument {
    /// Deserializes a document addressed to this service.
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let document: Self = serde_json::from_str(json)?;
        if document.service_type != SERVICE_TYPE {
            return Err(ConfigError::WrongType(document.service_type));
        }
        Ok(document)
    }
}

/// A validated configuration change, ready to be bound to the uploader.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceConfig {
    pub revision: i64,
    pub reload: bool,
    pub stop: bool,
    pub begin_posting: i64,
    pub api_key: String,
    pub system_id: String,
    pub scripts: ScriptSet,
}

impl ServiceConfig {
    /// Compiles the output scripts of an already type-checked document.
    pub fn from_document(document: ServiceConfigDocument) -> Result<Self, ConfigError> {
        let scripts = match document.outputs.as_deref() {
            Some(specs) => ScriptSet::compile(specs)?,
            None => ScriptSet::default(),
        };

        Ok(Self {
            revision: document.revision,
            reload: document.reload,
            stop: document.stop,
            begin_posting: document.begdate,
            api_key: document.apikey.trim().to_string(),
            system_id: document.systemid.trim().to_string(),
            scripts,
        })
    }
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ServiceConfig, ServiceConfigDocument};

    fn parse(json: &str) -> Result<ServiceConfig, ConfigError> {
        ServiceConfig::from_document(ServiceConfigDocument::parse(json)?)
    }

    #[test]
    fn parses_complete_document() {
        let config = parse(
            r#"{
                "type": "pvoutput",
                "revision": 7,
                "reload": true,
                "stop": false,
                "begdate": 1700000000,
                "apikey": " abc123 ",
                "systemid": 12345,
                "outputs": [
                    {"name": "generation", "units": "Watts", "script": "@1+@2"},
                    {"name": "voltage", "units": "Volts", "script": "@3"}
                ]
            }"#,
        )
        .expect("config should parse");

        assert_eq!(config.revision, 7);
        assert!(config.reload);
        assert!(!config.stop);
        assert_eq!(config.begin_posting, 1_700_000_000);
        assert_eq!(config.api_key, "abc123");
        assert_eq!(config.system_id, "12345");
        assert_eq!(config.scripts.len(), 2);
    }

    #[test]
    fn missing_outputs_yield_empty_script_set() {
        let config = parse(r#"{"type":"pvoutput","revision":1}"#)
            .expect("config should parse");

        assert!(config.scripts.is_empty());
        assert_eq!(config.api_key, "");
    }

    #[test]
    fn rejects_other_service_types() {
        let result = parse(r#"{"type":"influxdb","revision":1}"#);

        assert!(matches!(result, Err(ConfigError::WrongType(kind)) if kind == "influxdb"));
    }

    #[test]
    fn rejects_malformed_json_and_outputs() {
        assert!(matches!(
            parse("{not json"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            parse(
                r#"{"type":"pvoutput","outputs":[{"name":"generation","script":"watts"}]}"#
            ),
            Err(ConfigError::Outputs(_))
        ));
    }
}
