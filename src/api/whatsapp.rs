use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::{ApiError, ApiResult, JsonBody, SharedState, admin};
use crate::auth::AuthUser;
use crate::models::{NewWhatsAppLog, WhatsAppIntegration, WhatsAppIntegrationInput};
use crate::whatsapp::{self, WebhookEnvelope, WebhookOutcome};

pub const DEFAULT_LOG_LIMIT: usize = 50;
pub const MAX_LOG_LIMIT: usize = 500;

#[derive(Deserialize, Default)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct TestMessageRequest {
    pub number: String,
    pub text: Option<String>,
}

/// Keeps the last four characters of the API key.
fn masked(mut integration: WhatsAppIntegration) -> WhatsAppIntegration {
    let key = &integration.api_key;
    let tail: String = key
        .chars()
        .skip(key.chars().count().saturating_sub(4))
        .collect();
    integration.api_key = format!("****{}", tail);
    integration
}

pub async fn get_config(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let integration = state
        .store
        .call(|s| s.get_whatsapp_integration())
        .await?
        .map(masked);
    Ok(Json(integration))
}

pub async fn put_config(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    JsonBody(mut input): JsonBody<WhatsAppIntegrationInput>,
) -> ApiResult<impl IntoResponse> {
    admin(user)?;
    for (field, value) in [
        ("apiUrl", &input.api_url),
        ("apiKey", &input.api_key),
        ("instanceName", &input.instance_name),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::Validation {
                field: field.into(),
                message: "must not be empty".into(),
            });
        }
    }
    input.authorized_numbers = input
        .authorized_numbers
        .iter()
        .map(|n| whatsapp::gate::digits(n))
        .filter(|n| !n.is_empty())
        .collect();
    if input.restrict_to_group && input.allowed_group_jid.is_none() {
        return Err(ApiError::Validation {
            field: "allowedGroupJid".into(),
            message: "is required when restrictToGroup is set".into(),
        });
    }
    let saved = state
        .store
        .call(move |s| s.save_whatsapp_integration(input))
        .await?;
    info!(
        instance = %saved.instance_name,
        active = saved.is_active,
        authorized = saved.authorized_numbers.len(),
        "WhatsApp integration saved"
    );
    Ok(Json(masked(saved)))
}

pub async fn list_logs(
    State(state): State<SharedState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let logs = state
        .store
        .call(move |s| s.list_whatsapp_logs(limit))
        .await?;
    Ok(Json(logs))
}

pub async fn test_message(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<TestMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let number = whatsapp::gate::digits(&req.number);
    if number.is_empty() {
        return Err(ApiError::Validation {
            field: "number".into(),
            message: "must contain digits".into(),
        });
    }
    let text = req
        .text
        .unwrap_or_else(|| "✅ Pontual conectado ao WhatsApp.".to_string());
    let integration = state
        .store
        .call(|s| s.get_whatsapp_integration())
        .await?
        .ok_or_else(|| ApiError::BadRequest("WhatsApp integration is not configured".into()))?;

    let result = state.sender.send_text(&integration, &number, &text).await;
    let log = NewWhatsAppLog {
        phone_number: number,
        message: text,
        command: Some("TEST_MESSAGE".into()),
        response: None,
        success: result.is_ok(),
        error_message: result.as_ref().err().map(|e| format!("send failed: {}", e)),
    };
    state.store.call(move |s| s.append_whatsapp_log(log)).await?;

    match result {
        Ok(()) => Ok(Json(json!({"sent": true}))),
        Err(e) => Err(ApiError::BadRequest(format!("Failed to send message: {}", e))),
    }
}

/// Evolution API webhook. Always answers 200 so the gateway never retries;
/// problems end up in the log.
pub async fn webhook(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let ok = Json(json!({"status": "ok"}));
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(e) => {
            warn!(%instance, error = %e, "Malformed webhook payload");
            return ok;
        }
    };
    match whatsapp::handle_webhook(
        &state.store,
        state.sender.as_ref(),
        &instance,
        &envelope,
        state.now(),
    )
    .await
    {
        Ok(WebhookOutcome::Ignored | WebhookOutcome::ForeignInstance) => {}
        Ok(outcome) => info!(%instance, ?outcome, "Webhook processed"),
        Err(e) => error!(%instance, error = %e, "Webhook processing failed"),
    }
    ok
}
