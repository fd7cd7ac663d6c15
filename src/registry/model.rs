use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Create-style (POST) or update-style (PUT) call against one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMethod {
    Create,
    Update,
}

impl SendMethod {
    pub fn as_http(&self) -> reqwest::Method {
        match self {
            SendMethod::Create => reqwest::Method::POST,
            SendMethod::Update => reqwest::Method::PUT,
        }
    }
}

/// Uniform classification of one registry call.
///
/// `status_code` is 0 when no response was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResult {
    pub success: bool,
    pub body: Option<Value>,
    pub error_text: String,
    pub status_code: u16,
}

impl ClientResult {
    pub fn accepted(status_code: u16, body: Value) -> Self {
        Self {
            success: true,
            body: Some(body),
            error_text: String::new(),
            status_code,
        }
    }

    pub fn rejected(status_code: u16, error_text: impl Into<String>) -> Self {
        Self {
            success: false,
            body: None,
            error_text: error_text.into(),
            status_code,
        }
    }

    pub fn transport_error(error_text: impl Into<String>) -> Self {
        Self::rejected(0, error_text)
    }

    /// Registry-assigned identifier, if the response carried one.
    pub fn external_id(&self) -> Option<String> {
        let value = self.body.as_ref()?.get("id_pddikti")?;
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn external_id_reads_string_or_number() {
        let ok = ClientResult::accepted(200, json!({"id_pddikti": "P1"}));
        assert_eq!(ok.external_id().as_deref(), Some("P1"));

        let numeric = ClientResult::accepted(201, json!({"id_pddikti": 77}));
        assert_eq!(numeric.external_id().as_deref(), Some("77"));

        let blank = ClientResult::accepted(200, json!({"id_pddikti": " "}));
        assert!(blank.external_id().is_none());

        let missing = ClientResult::accepted(200, json!({"status": "ok"}));
        assert!(missing.external_id().is_none());

        assert!(ClientResult::transport_error("refused").external_id().is_none());
    }

    #[test]
    fn methods_map_to_http_verbs() {
        assert_eq!(SendMethod::Create.as_http(), reqwest::Method::POST);
        assert_eq!(SendMethod::Update.as_http(), reqwest::Method::PUT);
    }
}
