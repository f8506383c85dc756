use crate::domain::{Account, Plan, TransitionEffect};
use crate::infrastructure::Notifier;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Account notifications sent after billing transitions. Delivery is best effort.
pub struct NotificationDispatcher<N>
where
    N: Notifier + 'static,
{
    notifier: Arc<N>,
    site_url: String,
}

impl<N> NotificationDispatcher<N>
where
    N: Notifier + 'static,
{
    pub fn new(notifier: Arc<N>, site_url: String) -> Self {
        Self { notifier, site_url }
    }

    /// Spawn the message for `effect` on its own task. The caller never waits on delivery.
    ///
    /// Returns `None` when the account has no phone or the effect has no message.
    pub fn dispatch(
        &self,
        account: &Account,
        plan: Option<&Plan>,
        effect: TransitionEffect,
    ) -> Option<JoinHandle<()>> {
        let Some(phone) = account.phone.clone() else {
            debug!(account_id = %account.id, "No phone on account, skipping notification");
            return None;
        };
        let message = self.message_for(account, plan, effect)?;
        Some(self.spawn_send(account, phone, message, effect.to_string()))
    }

    /// Welcome message after registration, pointing the user at checkout.
    pub fn dispatch_welcome(&self, account: &Account, plan: &Plan) -> Option<JoinHandle<()>> {
        let phone = account.phone.clone()?;
        let first_name = account.name.split_whitespace().next().unwrap_or("");
        let message = format!(
            "🌅 Bem-vindo(a) ao Aurora IA, {}! Sua conta foi criada. Plano: {} (R$ {},{:02}/mês, \
             {} perguntas por mês, {} perfis de bebês). Complete o pagamento para ativar sua \
             conta. Este é um serviço educativo: sempre consulte seu pediatra. Emergências: \
             192 (SAMU) | 193 (Bombeiros).",
            first_name,
            plan.display_name,
            plan.price / 100,
            plan.price % 100,
            plan.question_quota,
            plan.profile_quota
        );
        Some(self.spawn_send(account, phone, message, "welcome".to_string()))
    }

    fn spawn_send(
        &self,
        account: &Account,
        phone: String,
        message: String,
        kind: String,
    ) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let account_id = account.id;

        tokio::spawn(async move {
            if let Err(e) = notifier.send(&phone, &message).await {
                warn!(
                    account_id = %account_id,
                    kind = %kind,
                    "Failed to deliver notification: {}",
                    e
                );
            }
        })
    }

    fn message_for(
        &self,
        account: &Account,
        plan: Option<&Plan>,
        effect: TransitionEffect,
    ) -> Option<String> {
        let first_name = account.name.split_whitespace().next().unwrap_or("");
        let plan_name = plan
            .map(|p| p.display_name.as_str())
            .unwrap_or(account.plan_id.as_str());

        match effect {
            TransitionEffect::Activated => Some(format!(
                "Olá, {}! 🌟 Sua assinatura do {} está ativa. Válido até: {}. Acesse {} e faça \
                 sua primeira pergunta sobre o desenvolvimento do seu bebê.",
                first_name,
                plan_name,
                account.period_end.format("%d/%m/%Y"),
                self.site_url
            )),
            TransitionEffect::PaymentFailed => Some(format!(
                "Olá, {}. Não conseguimos processar o pagamento do {}. Atualize sua forma de \
                 pagamento para continuar usando a Aurora IA.",
                first_name, plan_name
            )),
            TransitionEffect::Cancelled => Some(format!(
                "Olá, {}. Sua assinatura do {} foi cancelada. Você pode voltar quando quiser \
                 em {}.",
                first_name, plan_name, self.site_url
            )),
            TransitionEffect::Renewed => None,
        }
    }
}
