use crate::application::{Allowance, Grant, RegistrationInput, UsageSummary};
use crate::domain::{Account, Conversation, Plan, UsageCounter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub(super) struct PlanResponse {
    #[schema(example = "essencial")]
    pub(super) id: String,
    #[schema(example = "Aurora IA Essencial")]
    pub(super) display_name: String,
    /// Price in cents (BRL).
    #[schema(example = 1990)]
    pub(super) price: i64,
    pub(super) question_quota: i32,
    pub(super) report_quota: i32,
    pub(super) profile_quota: i32,
    #[schema(example = "monthly")]
    pub(super) billing_period_length: String,
}

impl From<&Plan> for PlanResponse {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.clone(),
            display_name: plan.display_name.clone(),
            price: plan.price,
            question_quota: plan.question_quota,
            report_quota: plan.report_quota,
            profile_quota: plan.profile_quota,
            billing_period_length: plan.billing_period_length.to_string(),
        }
    }
}

/// Sign-up request. `nome`, `telefone`, `senha` and `plano` are accepted as aliases.
#[derive(Deserialize, ToSchema)]
pub(super) struct RegisterRequest {
    #[serde(default, alias = "nome")]
    #[schema(example = "Ana Souza")]
    pub(super) name: Option<String>,
    #[serde(default)]
    #[schema(example = "ana@example.com")]
    pub(super) email: Option<String>,
    #[serde(default, alias = "telefone")]
    #[schema(example = "11987654321")]
    pub(super) phone: Option<String>,
    #[serde(default, alias = "senha")]
    pub(super) password: Option<String>,
    #[serde(default, alias = "plano")]
    #[schema(example = "essencial")]
    pub(super) plan_id: Option<String>,
}

impl From<RegisterRequest> for RegistrationInput {
    fn from(req: RegisterRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            phone: req.phone,
            password: req.password,
            plan_id: req.plan_id,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct RegisterResponse {
    pub(super) account_id: Uuid,
    pub(super) checkout_url: String,
    pub(super) plan: PlanResponse,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct LoginRequest {
    #[schema(example = "ana@example.com")]
    pub(super) email: String,
    #[serde(alias = "senha")]
    pub(super) password: String,
}

#[derive(Serialize, ToSchema)]
pub(super) struct LoginResponse {
    pub(super) access_token: String,
    pub(super) account: AccountResponse,
}

#[derive(Serialize, ToSchema)]
pub(super) struct AccountResponse {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) name: String,
    pub(super) phone: Option<String>,
    pub(super) plan_id: String,
    #[schema(example = "active")]
    pub(super) status: String,
    #[schema(example = "paid")]
    pub(super) payment_status: String,
    pub(super) period_start: DateTime<Utc>,
    pub(super) period_end: DateTime<Utc>,
    pub(super) created_at: DateTime<Utc>,
    #[schema(format = "date-time")]
    pub(super) activated_at: Option<DateTime<Utc>>,
    #[schema(format = "date-time")]
    pub(super) cancelled_at: Option<DateTime<Utc>>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            name: account.name,
            phone: account.phone,
            plan_id: account.plan_id,
            status: account.status.to_string(),
            payment_status: account.payment_status.to_string(),
            period_start: account.period_start,
            period_end: account.period_end,
            created_at: account.created_at,
            activated_at: account.activated_at,
            cancelled_at: account.cancelled_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct AllowanceResponse {
    pub(super) used: i32,
    pub(super) limit: i32,
    pub(super) remaining: i32,
}

impl From<Allowance> for AllowanceResponse {
    fn from(a: Allowance) -> Self {
        Self {
            used: a.used,
            limit: a.limit,
            remaining: a.remaining,
        }
    }
}

impl From<Grant> for AllowanceResponse {
    fn from(g: Grant) -> Self {
        Self {
            used: g.used,
            limit: g.limit,
            remaining: g.remaining,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct UsageResponse {
    pub(super) period_key: String,
    pub(super) questions: AllowanceResponse,
    pub(super) reports: AllowanceResponse,
}

impl From<UsageSummary> for UsageResponse {
    fn from(summary: UsageSummary) -> Self {
        Self {
            period_key: summary.period_key,
            questions: summary.questions.into(),
            reports: summary.reports.into(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct UsageHistoryEntry {
    pub(super) period_key: String,
    pub(super) questions_used: i32,
    pub(super) reports_used: i32,
}

impl From<UsageCounter> for UsageHistoryEntry {
    fn from(counter: UsageCounter) -> Self {
        Self {
            period_key: counter.period_key,
            questions_used: counter.questions_used,
            reports_used: counter.reports_used,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct MeResponse {
    pub(super) account: AccountResponse,
    pub(super) plan: Option<PlanResponse>,
    pub(super) usage: UsageResponse,
    pub(super) history: Vec<UsageHistoryEntry>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct QuestionRequest {
    #[serde(alias = "pergunta")]
    #[schema(example = "Com quantos meses o bebê começa a engatinhar?")]
    pub(super) question: String,
    #[serde(default, alias = "babyId")]
    pub(super) baby_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub(super) struct QuestionResponse {
    pub(super) answer: String,
    pub(super) tokens_used: Option<u32>,
    pub(super) usage: AllowanceResponse,
}

#[derive(Deserialize, Debug, IntoParams)]
pub(super) struct HistoryParams {
    #[serde(default = "default_history_limit")]
    #[param(default = 20, maximum = 50)]
    pub(super) limit: i64,
}

fn default_history_limit() -> i64 {
    20
}

#[derive(Serialize, ToSchema)]
pub(super) struct ConversationResponse {
    pub(super) id: Uuid,
    pub(super) baby_id: Option<Uuid>,
    pub(super) question: String,
    pub(super) answer: String,
    pub(super) tokens_used: Option<i32>,
    pub(super) created_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationResponse {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            baby_id: c.baby_id,
            question: c.question,
            answer: c.answer,
            tokens_used: c.tokens_used,
            created_at: c.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct WebhookAck {
    pub(super) received: bool,
    #[schema(example = "applied")]
    pub(super) outcome: String,
}
