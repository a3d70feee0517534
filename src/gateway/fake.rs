use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AuthorizationRequest, IntentStatus, NewCustomer, PaymentGateway, PaymentIntent,
    PaymentMethodDetails,
};
use crate::error::{AppError, Result};

/// Scripted result of the next new authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    Succeed,
    RequireAction,
    /// The intent is created but has not settled yet.
    Processing,
    Decline(String),
    Unavailable,
    RateLimited,
    Rejected,
}

#[derive(Debug, Default)]
struct FakeState {
    outcomes: VecDeque<FakeOutcome>,
    methods: HashMap<String, PaymentMethodDetails>,
    intents: HashMap<String, PaymentIntent>,
    /// First response per idempotency key, replayed verbatim.
    responses_by_key: HashMap<String, PaymentIntent>,
    requests: Vec<AuthorizationRequest>,
    customers: Vec<NewCustomer>,
    attached: Vec<(String, String)>,
    fail_customer_creation: bool,
    fail_attach: bool,
    latency: Option<Duration>,
}

/// In-process gateway with scripted outcomes.
///
/// Authorizations are deduplicated by idempotency key the way a real gateway replays them: a
/// repeated key returns the original response, even if the intent has since changed state, and
/// neither consumes an outcome nor creates a charge. `retrieve_payment_intent` sees live state.
#[derive(Debug, Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queues the outcome of the next new authorization. Defaults to success when empty.
    pub fn push_outcome(&self, outcome: FakeOutcome) {
        self.state().outcomes.push_back(outcome);
    }

    pub fn register_method(&self, id: &str, brand: &str, last4: &str) {
        self.state().methods.insert(
            id.to_string(),
            PaymentMethodDetails {
                id: id.to_string(),
                brand: Some(brand.to_string()),
                last4: Some(last4.to_string()),
            },
        );
    }

    pub fn fail_customer_creation(&self, fail: bool) {
        self.state().fail_customer_creation = fail;
    }

    pub fn fail_attach(&self, fail: bool) {
        self.state().fail_attach = fail;
    }

    /// Delays every authorization, for exercising concurrent settlements.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Overrides the gateway-side status of an existing intent.
    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) {
        if let Some(intent) = self.state().intents.get_mut(intent_id) {
            intent.status = status;
        }
    }

    /// Every create-and-confirm call received, replays included.
    pub fn authorization_requests(&self) -> Vec<AuthorizationRequest> {
        self.state().requests.clone()
    }

    /// Number of distinct successful charges.
    pub fn charges(&self) -> usize {
        self.state()
            .intents
            .values()
            .filter(|intent| intent.status == IntentStatus::Succeeded)
            .count()
    }

    pub fn customers_created(&self) -> usize {
        self.state().customers.len()
    }

    /// `(method_id, customer_id)` pairs attached so far.
    pub fn attached_methods(&self) -> Vec<(String, String)> {
        self.state().attached.clone()
    }

    fn method_details(state: &FakeState, method_id: &str) -> PaymentMethodDetails {
        state
            .methods
            .get(method_id)
            .cloned()
            .unwrap_or_else(|| PaymentMethodDetails {
                id: method_id.to_string(),
                brand: None,
                last4: None,
            })
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<String> {
        let mut state = self.state();
        if state.fail_customer_creation {
            return Err(AppError::GatewayUnavailable(
                "customer creation unavailable".to_string(),
            ));
        }
        state.customers.push(customer.clone());
        Ok(format!("cus_fake_{}", state.customers.len()))
    }

    async fn create_and_confirm(&self, request: &AuthorizationRequest) -> Result<PaymentIntent> {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        state.requests.push(request.clone());

        if let Some(original) = state.responses_by_key.get(&request.idempotency_key) {
            return Ok(original.clone());
        }

        let outcome = state.outcomes.pop_front().unwrap_or(FakeOutcome::Succeed);
        let status = match outcome {
            FakeOutcome::Succeed => IntentStatus::Succeeded,
            FakeOutcome::RequireAction => IntentStatus::RequiresAction,
            FakeOutcome::Processing => IntentStatus::Processing,
            FakeOutcome::Decline(reason) => return Err(AppError::GatewayDeclined(reason)),
            FakeOutcome::Unavailable => {
                return Err(AppError::GatewayUnavailable("gateway timeout".to_string()))
            }
            FakeOutcome::RateLimited => {
                return Err(AppError::GatewayRateLimited("too many requests".to_string()))
            }
            FakeOutcome::Rejected => {
                return Err(AppError::GatewayRejectedRequest("invalid API key".to_string()))
            }
        };

        let id = format!("pi_fake_{}", state.intents.len() + 1);
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: Some(format!("{}_secret", id)),
            status,
            amount_minor: request.amount_minor,
            customer_id: Some(request.customer_id.clone()),
            invoice_number: Some(request.invoice_number.clone()),
            payment_method: Some(Self::method_details(&state, &request.payment_method)),
            failure_message: None,
        };
        state.intents.insert(id, intent.clone());
        state
            .responses_by_key
            .insert(request.idempotency_key.clone(), intent.clone());

        Ok(intent)
    }

    async fn retrieve_payment_method(&self, method_id: &str) -> Result<PaymentMethodDetails> {
        self.state()
            .methods
            .get(method_id)
            .cloned()
            .ok_or_else(|| {
                AppError::GatewayRejectedRequest(format!("No such payment_method: {}", method_id))
            })
    }

    async fn attach_payment_method(&self, method_id: &str, customer_id: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_attach {
            return Err(AppError::GatewayRejectedRequest(
                "payment method cannot be attached".to_string(),
            ));
        }
        state
            .attached
            .push((method_id.to_string(), customer_id.to_string()));
        Ok(())
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.state()
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| {
                AppError::GatewayRejectedRequest(format!("No such payment_intent: {}", intent_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            amount_minor: 15000,
            currency: "usd".to_string(),
            customer_id: "cus_fake_1".to_string(),
            payment_method: "pm_visa".to_string(),
            off_session: false,
            save_for_future: false,
            idempotency_key: key.to_string(),
            invoice_number: "INV-1042".to_string(),
        }
    }

    #[tokio::test]
    async fn test_replayed_key_returns_original_intent() {
        let gateway = FakeGateway::new();
        gateway.register_method("pm_visa", "visa", "4242");

        let first = gateway.create_and_confirm(&request("k1")).await.unwrap();
        let replay = gateway.create_and_confirm(&request("k1")).await.unwrap();

        assert_eq!(first.id, replay.id);
        assert_eq!(gateway.charges(), 1);
        assert_eq!(gateway.authorization_requests().len(), 2);
        assert_eq!(first.payment_method.unwrap().label(), "Visa ending in 4242");
    }

    #[tokio::test]
    async fn test_replay_returns_first_response_not_live_state() {
        let gateway = FakeGateway::new();
        gateway.push_outcome(FakeOutcome::RequireAction);

        let first = gateway.create_and_confirm(&request("k1")).await.unwrap();
        gateway.set_intent_status(&first.id, IntentStatus::Succeeded);

        let replay = gateway.create_and_confirm(&request("k1")).await.unwrap();
        assert_eq!(replay.status, IntentStatus::RequiresAction);

        let live = gateway.retrieve_payment_intent(&first.id).await.unwrap();
        assert_eq!(live.status, IntentStatus::Succeeded);
        assert_eq!(live.invoice_number.as_deref(), Some("INV-1042"));
        assert_eq!(gateway.charges(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let gateway = FakeGateway::new();
        gateway.push_outcome(FakeOutcome::Decline("insufficient_funds".into()));
        gateway.push_outcome(FakeOutcome::RequireAction);

        let declined = gateway.create_and_confirm(&request("a")).await;
        assert!(matches!(declined, Err(AppError::GatewayDeclined(_))));

        let action = gateway.create_and_confirm(&request("b")).await.unwrap();
        assert_eq!(action.status, IntentStatus::RequiresAction);
        assert_eq!(gateway.charges(), 0);
    }
}
