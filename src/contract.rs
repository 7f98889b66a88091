//! Contract drafting from a short description of the deal.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::llm::{ChatModel, CompletionRequest};
use crate::models::Sections;

const GENERATION_PROMPT: &str = "Generate a legal contract based on the provided context. \
Follow Russian legal standards and ensure comprehensive coverage. Identify the contract \
type, generate the contract text as 'Section: text' lines, and explain the key sections.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractRequest {
    pub contract_type: Option<String>,
    #[serde(default)]
    pub parties: Vec<String>,
    pub key_terms: Option<String>,
    #[serde(default)]
    pub additional_context: String,
}

impl ContractRequest {
    fn render(&self) -> String {
        let parties = if self.parties.is_empty() {
            "Not Specified".to_string()
        } else {
            self.parties.join(", ")
        };
        format!(
            "Generate a contract with these details:\n\
             Contract Type: {}\n\
             Parties: {}\n\
             Key Terms: {}\n\
             Additional Context: {}",
            self.contract_type.as_deref().unwrap_or("Undefined"),
            parties,
            self.key_terms.as_deref().unwrap_or("No specific terms"),
            self.additional_context
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Textarea,
    Number,
}

/// A value the user still has to fill into the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputField {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedContract {
    pub contract: Sections,
    pub input_fields: Vec<InputField>,
}

pub struct ContractGenerator {
    llm: Arc<dyn ChatModel>,
}

impl ContractGenerator {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    pub async fn generate(&self, request: &ContractRequest) -> Result<GeneratedContract> {
        let completion = CompletionRequest::new(GENERATION_PROMPT, request.render());
        let text = self.llm.complete(&completion).await.map_err(|e| {
            tracing::error!(error = %e, "contract generation failed");
            e
        })?;
        let contract = Sections::from_lines(&text);
        tracing::info!(sections = contract.len(), "contract drafted");
        Ok(GeneratedContract {
            contract,
            input_fields: input_fields(request.contract_type.as_deref()),
        })
    }
}

pub fn input_fields(contract_type: Option<&str>) -> Vec<InputField> {
    let mut fields = vec![
        InputField {
            name: "party1_name",
            label: "First party name",
            kind: FieldKind::Text,
        },
        InputField {
            name: "party2_name",
            label: "Second party name",
            kind: FieldKind::Text,
        },
    ];
    if contract_type == Some("service") {
        fields.push(InputField {
            name: "service_description",
            label: "Service description",
            kind: FieldKind::Textarea,
        });
        fields.push(InputField {
            name: "service_price",
            label: "Service price",
            kind: FieldKind::Number,
        });
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ChatModel for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            Ok(request.user_turn.clone())
        }
    }

    #[test]
    fn service_contracts_ask_for_description_and_price() {
        let names: Vec<&str> = input_fields(Some("service")).iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["party1_name", "party2_name", "service_description", "service_price"]
        );
        assert_eq!(input_fields(Some("lease")).len(), 2);
        assert_eq!(input_fields(None).len(), 2);
    }

    #[test]
    fn request_defaults_are_rendered() {
        let text = ContractRequest::default().render();
        assert!(text.contains("Contract Type: Undefined"));
        assert!(text.contains("Parties: Not Specified"));
        assert!(text.contains("Key Terms: No specific terms"));
    }

    #[tokio::test]
    async fn generated_text_is_split_into_sections() {
        let generator = ContractGenerator::new(Arc::new(Echo));
        let request = ContractRequest {
            contract_type: Some("service".to_string()),
            parties: vec!["Tech LLC".to_string(), "IE Ivanov".to_string()],
            key_terms: Some("Web application development".to_string()),
            additional_context: String::new(),
        };
        let out = generator.generate(&request).await.unwrap();
        assert_eq!(out.contract.get("Parties"), Some("Tech LLC, IE Ivanov"));
        assert_eq!(out.contract.get("Contract Type"), Some("service"));
        assert_eq!(out.input_fields.len(), 4);
        let json = serde_json::to_value(&out.input_fields[2]).unwrap();
        assert_eq!(json["type"], "textarea");
    }
}
