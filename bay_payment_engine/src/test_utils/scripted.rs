use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use crate::{
    db_types::{OrderNo, SettlementReceipt, SettlementRequest},
    traits::{NotifyOutcome, NotifyTransport, PaymentProvider, ProviderError, ProviderOrderStatus},
};

/// A [`PaymentProvider`] that plays back scripted answers. Clones share the script.
///
/// Callbacks verify by default. Order queries answer `NotFound` unless an answer has been
/// scripted for that order number. Settlements succeed with a generated receipt unless results
/// have been queued with [`ScriptedProvider::script_settlement`].
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    inner: Arc<Mutex<ProviderScript>>,
}

struct ProviderScript {
    accept_callbacks: bool,
    order_answers: HashMap<String, Result<ProviderOrderStatus, ProviderError>>,
    settlements: VecDeque<Result<SettlementReceipt, ProviderError>>,
    settlement_calls: Vec<SettlementRequest>,
}

impl Default for ProviderScript {
    fn default() -> Self {
        Self {
            accept_callbacks: true,
            order_answers: HashMap::new(),
            settlements: VecDeque::new(),
            settlement_calls: Vec::new(),
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// All callback verifications fail from now on.
    pub fn reject_callbacks(&self) {
        self.inner.lock().unwrap().accept_callbacks = false;
    }

    pub fn script_order_status(&self, order_no: &OrderNo, status: ProviderOrderStatus) {
        self.inner.lock().unwrap().order_answers.insert(order_no.as_str().to_string(), Ok(status));
    }

    pub fn script_order_failure(&self, order_no: &OrderNo, err: ProviderError) {
        self.inner.lock().unwrap().order_answers.insert(order_no.as_str().to_string(), Err(err));
    }

    /// Queues the answer for the next settlement call. Answers are consumed in order.
    pub fn script_settlement(&self, result: Result<SettlementReceipt, ProviderError>) {
        self.inner.lock().unwrap().settlements.push_back(result);
    }

    /// Every settlement request made so far, oldest first.
    pub fn settlement_requests(&self) -> Vec<SettlementRequest> {
        self.inner.lock().unwrap().settlement_calls.clone()
    }
}

impl PaymentProvider for ScriptedProvider {
    fn verify_callback(&self, _params: &HashMap<String, String>) -> bool {
        self.inner.lock().unwrap().accept_callbacks
    }

    async fn query_order(&self, order_no: &OrderNo) -> Result<ProviderOrderStatus, ProviderError> {
        let script = self.inner.lock().unwrap();
        script.order_answers.get(order_no.as_str()).cloned().unwrap_or(Ok(ProviderOrderStatus::NotFound))
    }

    async fn settle_royalty(&self, request: &SettlementRequest) -> Result<SettlementReceipt, ProviderError> {
        let mut script = self.inner.lock().unwrap();
        script.settlement_calls.push(request.clone());
        script.settlements.pop_front().unwrap_or_else(|| {
            Ok(SettlementReceipt {
                settle_no: format!("SETTLE-{}", request.order_id),
                raw_result: "{\"code\":\"10000\"}".to_string(),
            })
        })
    }
}

/// A [`NotifyTransport`] that records deliveries instead of making them.
///
/// Outcomes are scripted per call and default to [`NotifyOutcome::Success`] when the script runs
/// dry.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<TransportLog>>,
}

#[derive(Default)]
struct TransportLog {
    outcomes: VecDeque<NotifyOutcome>,
    deliveries: Vec<(String, Vec<(String, String)>)>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, outcome: NotifyOutcome) {
        self.inner.lock().unwrap().outcomes.push_back(outcome);
    }

    /// `(url, form)` pairs for every delivery so far, oldest first.
    pub fn deliveries(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.inner.lock().unwrap().deliveries.clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.inner.lock().unwrap().deliveries.len()
    }
}

impl NotifyTransport for RecordingTransport {
    async fn deliver(&self, url: &str, form: &[(String, String)]) -> NotifyOutcome {
        let mut log = self.inner.lock().unwrap();
        log.deliveries.push((url.to_string(), form.to_vec()));
        log.outcomes.pop_front().unwrap_or(NotifyOutcome::Success)
    }
}
