//! Assistente de saúde sobre um modelo generativo
//!
//! Três chamadas opacas: análise de riscos, chat de primeiros socorros e
//! estimativa nutricional a partir de foto. Sem novas tentativas; a mensagem
//! do serviço chega ao usuário sem alteração.

use async_trait::async_trait;
use campus_db::models::{EmergencyReport, HospitalFeedback, MessFoodRating};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::binder::Record;
use crate::config::AssistantConfig;
use crate::error::PortalError;

/// Resposta fixa quando o chat falha
pub const CHAT_FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

const RISK_INSTRUCTION: &str = "You are a public health analyst for a university campus. \
Analyze the emergency reports, hospital feedbacks and mess food ratings provided as JSON. \
Identify potential health risks such as foodborne illness outbreaks, overcrowded clinics or \
recurring emergencies. Reply with JSON of the form {\"healthRisks\": [{\"riskType\": string, \
\"riskLevel\": \"low\"|\"medium\"|\"high\", \"affectedArea\": string, \"description\": string, \
\"recommendations\": [string]}]}.";

const FIRST_AID_INSTRUCTION: &str = "You are a first-aid assistant for university students. \
Give short, clear first-aid guidance. Always advise contacting the campus hospital or emergency \
services for serious situations. Reply with JSON of the form {\"response\": string}.";

const NUTRITION_INSTRUCTION: &str = "Estimate the nutritional content of the meal in the photo. \
Reply with JSON of the form {\"calories\": number, \"proteinGrams\": number, \
\"carbsGrams\": number, \"fatGrams\": number}.";

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// Mensagem de erro devolvida pelo serviço
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("The model returned an empty reply")]
    EmptyReply,

    #[error("Could not parse the model reply: {0}")]
    Malformed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<AssistantError> for PortalError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::InvalidInput(msg) => PortalError::invalid_field("photoDataUri", &msg),
            other => PortalError::Upstream(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Os três conjuntos analisados pelo modelo
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRiskInput {
    pub emergency_reports: Vec<Record<EmergencyReport>>,
    pub hospital_feedbacks: Vec<Record<HospitalFeedback>>,
    pub mess_food_ratings: Vec<Record<MessFoodRating>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRisk {
    pub risk_type: String,
    pub risk_level: String,
    pub affected_area: String,
    pub description: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEstimate {
    pub calories: f64,
    pub protein_grams: f64,
    pub carbs_grams: f64,
    pub fat_grams: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthAssistant: Send + Sync {
    async fn predict_health_risks(
        &self,
        input: &HealthRiskInput,
    ) -> Result<Vec<HealthRisk>, AssistantError>;

    async fn first_aid_reply(&self, history: &[ChatMessage]) -> Result<String, AssistantError>;

    /// `photo_data_uri` no formato `data:image/<tipo>;base64,<dados>`
    async fn estimate_nutrition(
        &self,
        photo_data_uri: &str,
    ) -> Result<NutritionEstimate, AssistantError>;
}

// Formato de troca da API generateContent

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiskReply {
    health_risks: Vec<HealthRisk>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    response: String,
}

fn text_part(text: impl Into<String>) -> Part {
    Part {
        text: Some(text.into()),
        inline_data: None,
    }
}

fn instruction(text: &str) -> Content {
    Content {
        role: None,
        parts: vec![text_part(text)],
    }
}

/// Separa `data:<mime>;base64,<dados>`
fn split_data_uri(uri: &str) -> Result<InlineData, AssistantError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| AssistantError::InvalidInput("expected a data URI".to_string()))?;
    let (mime_type, data) = rest
        .split_once(";base64,")
        .ok_or_else(|| AssistantError::InvalidInput("expected base64 data".to_string()))?;
    if !mime_type.starts_with("image/") || data.is_empty() {
        return Err(AssistantError::InvalidInput(
            "expected an image".to_string(),
        ));
    }
    Ok(InlineData {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

/// Aceita JSON puro ou cercado por ```json
fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, AssistantError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|e| AssistantError::Malformed(e.to_string()))
}

/// Cliente HTTP da API `generateContent`
#[derive(Debug, Clone)]
pub struct GeminiAssistant {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GeminiAssistant {
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, AssistantError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        debug!("Chamando modelo {}", self.model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("{status}: {body}"));
            warn!("Modelo respondeu {}: {}", status, message);
            return Err(AssistantError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let reply: GenerateResponse = response.json().await?;
        let text: String = reply
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect();

        if text.trim().is_empty() {
            return Err(AssistantError::EmptyReply);
        }
        Ok(text)
    }

    fn json_config() -> GenerationConfig {
        GenerationConfig {
            response_mime_type: "application/json",
        }
    }
}

#[async_trait]
impl HealthAssistant for GeminiAssistant {
    async fn predict_health_risks(
        &self,
        input: &HealthRiskInput,
    ) -> Result<Vec<HealthRisk>, AssistantError> {
        let data = serde_json::to_string(input)
            .map_err(|e| AssistantError::InvalidInput(e.to_string()))?;
        let request = GenerateRequest {
            system_instruction: instruction(RISK_INSTRUCTION),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![text_part(data)],
            }],
            generation_config: Self::json_config(),
        };

        let reply: RiskReply = parse_reply(&self.generate(request).await?)?;
        Ok(reply.health_risks)
    }

    async fn first_aid_reply(&self, history: &[ChatMessage]) -> Result<String, AssistantError> {
        let contents = history
            .iter()
            .map(|message| Content {
                role: Some(
                    match message.role {
                        ChatRole::User => "user",
                        ChatRole::Model => "model",
                    }
                    .to_string(),
                ),
                parts: vec![text_part(message.content.clone())],
            })
            .collect();
        let request = GenerateRequest {
            system_instruction: instruction(FIRST_AID_INSTRUCTION),
            contents,
            generation_config: Self::json_config(),
        };

        let reply: ChatReply = parse_reply(&self.generate(request).await?)?;
        Ok(reply.response)
    }

    async fn estimate_nutrition(
        &self,
        photo_data_uri: &str,
    ) -> Result<NutritionEstimate, AssistantError> {
        let photo = split_data_uri(photo_data_uri)?;
        let request = GenerateRequest {
            system_instruction: instruction(NUTRITION_INSTRUCTION),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: None,
                    inline_data: Some(photo),
                }],
            }],
            generation_config: Self::json_config(),
        };

        parse_reply(&self.generate(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const MODEL_PATH: &str = "/v1beta/models/test-model:generateContent";

    fn assistant(server: &MockServer) -> GeminiAssistant {
        GeminiAssistant::new(&AssistantConfig {
            endpoint: format!("{}/", server.uri()),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
        })
        .unwrap()
    }

    fn model_reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        }))
    }

    #[tokio::test]
    async fn test_parses_structured_risk_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .respond_with(model_reply(
                r#"{"healthRisks": [{"riskType": "Foodborne illness", "riskLevel": "high",
                    "affectedArea": "Veg mess", "description": "Sickness reports rising",
                    "recommendations": ["Inspect kitchen"]}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let risks = assistant(&server)
            .predict_health_risks(&HealthRiskInput::default())
            .await
            .unwrap();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].risk_level, "high");
        assert_eq!(risks[0].recommendations, vec!["Inspect kitchen"]);
    }

    #[tokio::test]
    async fn test_surfaces_service_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
            })))
            .mount(&server)
            .await;

        let err = assistant(&server)
            .first_aid_reply(&[ChatMessage {
                role: ChatRole::User,
                content: "I burned my hand".into(),
            }])
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Status { status: 429, .. }));
        let portal: PortalError = err.into();
        assert_eq!(portal.to_string(), "Resource has been exhausted");
    }

    #[tokio::test]
    async fn test_nutrition_sends_inline_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}]}]
            })))
            .respond_with(model_reply(
                "```json\n{\"calories\": 520, \"proteinGrams\": 18.5, \"carbsGrams\": 70, \"fatGrams\": 16}\n```",
            ))
            .mount(&server)
            .await;

        let estimate = assistant(&server)
            .estimate_nutrition("data:image/png;base64,iVBORw0KGgo=")
            .await
            .unwrap();
        assert_eq!(estimate.calories, 520.0);
        assert_eq!(estimate.protein_grams, 18.5);
    }

    #[tokio::test]
    async fn test_rejects_non_image_before_calling() {
        let server = MockServer::start().await;
        let err = assistant(&server)
            .estimate_nutrition("data:text/plain;base64,aGVsbG8=")
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidInput(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_parse_reply_rejects_garbage() {
        assert!(matches!(
            parse_reply::<ChatReply>("not json"),
            Err(AssistantError::Malformed(_))
        ));
        let reply: ChatReply = parse_reply("{\"response\": \"Cool the burn\"}").unwrap();
        assert_eq!(reply.response, "Cool the burn");
    }
}
