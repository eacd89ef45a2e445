use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::Currency;
use crate::error::AppError;
use crate::services::{SessionOutcome, SessionRequest};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub provider: String,
    /// Decimal string with at most two fractional digits.
    #[schema(value_type = String, example = "149.90")]
    pub amount: BigDecimal,
    pub currency: Currency,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    /// Caller-side customer identifier; stored tokens are listed by it.
    pub user_ref: Option<String>,
    pub description: Option<String>,
    pub success_url: String,
    pub failure_url: String,
    /// Overrides the default callback URL handed to the provider.
    pub notify_url: Option<String>,
    /// Charges this stored token directly instead of opening a hosted
    /// session.
    pub stored_token_id: Option<Uuid>,
    pub verification_code: Option<String>,
    #[serde(default)]
    pub request_token_creation: bool,
}

impl From<CreateSessionRequest> for SessionRequest {
    fn from(payload: CreateSessionRequest) -> Self {
        SessionRequest {
            provider: payload.provider,
            amount: payload.amount,
            currency: payload.currency,
            customer_name: payload.customer_name,
            customer_email: payload.customer_email,
            customer_phone: payload.customer_phone,
            user_ref: payload.user_ref,
            description: payload.description,
            success_url: payload.success_url,
            failure_url: payload.failure_url,
            notify_url: payload.notify_url,
            stored_token_id: payload.stored_token_id,
            verification_code: payload.verification_code,
            request_token_creation: payload.request_token_creation,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub transaction_id: Uuid,
    /// `redirect`, `step_up` or `completed`.
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_up_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created or charge resolved", body = SessionResponse),
        (status = 400, description = "Validation failure, unknown provider or unsupported operation"),
        (status = 404, description = "Stored token not found"),
        (status = 502, description = "Provider unreachable")
    ),
    tag = "Sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.initiator.create_session(payload.into()).await?;
    let response = match outcome {
        SessionOutcome::Redirect {
            transaction_id,
            redirect_url,
        } => SessionResponse {
            transaction_id,
            action: "redirect".to_string(),
            redirect_url: Some(redirect_url),
            step_up_url: None,
            status: None,
        },
        SessionOutcome::StepUpRequired {
            transaction_id,
            step_up_url,
        } => SessionResponse {
            transaction_id,
            action: "step_up".to_string(),
            redirect_url: None,
            step_up_url: Some(step_up_url),
            status: None,
        },
        SessionOutcome::Completed {
            transaction_id,
            status,
        } => SessionResponse {
            transaction_id,
            action: "completed".to_string(),
            redirect_url: None,
            step_up_url: None,
            status: Some(status.as_str().to_string()),
        },
    };
    Ok((StatusCode::CREATED, Json(response)))
}
