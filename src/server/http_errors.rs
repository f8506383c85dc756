use crate::application::{
    DenialReason, EntitlementError, QuestionError, ReconcileError, RegistrationError, SessionError,
};
use crate::infrastructure::{PaymentError, RepositoryError, SignatureError};
use crate::domain::WebhookParseError;
use axum::http::StatusCode;
use serde_json::{json, Value};

fn unavailable() -> (StatusCode, Value) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "error": "Service temporarily unavailable, please retry" }),
    )
}

fn internal(message: &str) -> (StatusCode, Value) {
    (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
}

fn map_repository_error(err: &RepositoryError, message: &str) -> (StatusCode, Value) {
    if err.is_transient() {
        unavailable()
    } else {
        internal(message)
    }
}

/// 402 body for a refused metered action.
pub(super) fn denial_response(reason: &DenialReason) -> (StatusCode, Value) {
    let mut body = json!({
        "error": denial_message(reason),
        "reason": reason.code(),
        "plan_id": reason.plan_id(),
        "needs_upgrade": true,
    });

    match reason {
        DenialReason::QuotaExceeded { used, limit, .. } => {
            body["used"] = json!(used);
            body["limit"] = json!(limit);
        }
        DenialReason::NotActive { status, .. } => {
            body["status"] = json!(status.to_string());
        }
        DenialReason::PeriodExpired { period_end, .. } => {
            body["period_end"] = json!(period_end);
        }
        DenialReason::PlanMisconfigured { .. } => {
            return internal("Plan configuration error");
        }
    }

    (StatusCode::PAYMENT_REQUIRED, body)
}

fn denial_message(reason: &DenialReason) -> String {
    match reason {
        DenialReason::QuotaExceeded { limit, .. } => {
            format!("Limite de {} perguntas atingido. Faça upgrade!", limit)
        }
        DenialReason::NotActive { .. } => "Assinatura inativa. Complete o pagamento.".to_string(),
        DenialReason::PeriodExpired { .. } => {
            "Período da assinatura encerrado. Renove seu plano.".to_string()
        }
        DenialReason::PlanMisconfigured { .. } => "Plan configuration error".to_string(),
    }
}

pub(super) fn map_registration_error(err: &RegistrationError) -> (StatusCode, Value) {
    match err {
        RegistrationError::Validation(msg) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Dados inválidos", "details": msg }),
        ),
        RegistrationError::UnknownPlan(plan) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Plano inválido selecionado", "plan_id": plan }),
        ),
        RegistrationError::AlreadyRegistered => (
            StatusCode::CONFLICT,
            json!({ "error": "Email já cadastrado. Faça login ou use outro email." }),
        ),
        RegistrationError::Repository(e) => map_repository_error(e, "Failed to register"),
        RegistrationError::Checkout(PaymentError::Transport(_)) => unavailable(),
        RegistrationError::Checkout(_) => (
            StatusCode::BAD_GATEWAY,
            json!({ "error": "Erro ao processar pagamento. Tente novamente." }),
        ),
        RegistrationError::Identity(_) => (
            StatusCode::BAD_GATEWAY,
            json!({ "error": "Erro ao criar conta. Tente novamente." }),
        ),
    }
}

pub(super) fn map_session_error(err: &SessionError) -> (StatusCode, Value) {
    match err {
        SessionError::InvalidCredentials => {
            (StatusCode::UNAUTHORIZED, json!({ "error": "Não autorizado" }))
        }
        SessionError::Identity(_) => (
            StatusCode::BAD_GATEWAY,
            json!({ "error": "Identity provider unavailable" }),
        ),
        SessionError::Repository(e) => map_repository_error(e, "Failed to load account"),
    }
}

pub(super) fn map_entitlement_error(err: &EntitlementError) -> (StatusCode, Value) {
    match err {
        EntitlementError::Repository(e) => map_repository_error(e, "Failed to check usage"),
    }
}

pub(super) fn map_question_error(err: &QuestionError) -> (StatusCode, Value) {
    match err {
        QuestionError::EmptyPrompt => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Pergunta é obrigatória" }),
        ),
        QuestionError::PromptTooLong => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Pergunta muito longa" }),
        ),
        QuestionError::Entitlement(e) => map_entitlement_error(e),
        QuestionError::Completion(_) => (
            StatusCode::BAD_GATEWAY,
            json!({ "error": "Erro ao gerar resposta. Tente novamente." }),
        ),
        QuestionError::Repository(e) => map_repository_error(e, "Failed to load conversations"),
    }
}

pub(super) fn map_signature_error(err: &SignatureError) -> (StatusCode, Value) {
    match err {
        SignatureError::InvalidSecret => internal("Webhook verification misconfigured"),
        _ => (
            StatusCode::UNAUTHORIZED,
            json!({ "error": "Invalid webhook signature" }),
        ),
    }
}

pub(super) fn map_webhook_parse_error(err: &WebhookParseError) -> (StatusCode, Value) {
    (
        StatusCode::BAD_REQUEST,
        json!({ "error": "Malformed webhook payload", "details": err.to_string() }),
    )
}

pub(super) fn map_reconcile_error(err: &ReconcileError) -> (StatusCode, Value) {
    if err.is_transient() {
        unavailable()
    } else {
        internal("Failed to process webhook")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountStatus;

    #[test]
    fn quota_denial_is_payment_required_with_counts() {
        let (status, body) = denial_response(&DenialReason::QuotaExceeded {
            used: 20,
            limit: 20,
            plan_id: "essencial".to_string(),
        });

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["reason"], "QUOTA_EXCEEDED");
        assert_eq!(body["used"], 20);
        assert_eq!(body["limit"], 20);
        assert_eq!(body["needs_upgrade"], true);
    }

    #[test]
    fn inactive_denial_names_status() {
        let (status, body) = denial_response(&DenialReason::NotActive {
            status: AccountStatus::PendingPayment,
            plan_id: "completo".to_string(),
        });

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["status"], "pending_payment");
        assert_eq!(body["plan_id"], "completo");
    }

    #[test]
    fn misconfigured_plan_is_internal_error() {
        let (status, _) = denial_response(&DenialReason::PlanMisconfigured {
            plan_id: "legacy".to_string(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn storage_timeouts_are_retryable_and_opaque() {
        let (status, body) = map_session_error(&SessionError::Repository(RepositoryError::Timeout));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.to_string().contains("Timeout"));
    }

    #[test]
    fn signature_failures_are_unauthorized() {
        let (status, _) = map_signature_error(&SignatureError::Mismatch);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
