//! Scripted in-process transport for tests and the sandbox binary.
//!
//! Every call is recorded. Requests are answered from scripted reply queues
//! when one is queued; otherwise they park until the test releases them, so
//! a test can hold a request open while it exercises the controller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};

use billingflow_catalog::ItemType;
use billingflow_core::{OrderId, ProductId};

use crate::config::BillingConfig;
use crate::error::{TransportError, codes::TRANSPORT_UNAVAILABLE_CODE};
use crate::transport::{ActivityResult, BillingTransport, CallbackSink};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect { generation: u64 },
    Disconnect,
    RequestProducts(Vec<ProductId>),
    RequestPurchase {
        product_id: ProductId,
        developer_payload: String,
    },
    RequestRestore,
    Acknowledge(OrderId),
    ActivityResult(ActivityResult),
}

type Parked<T> = VecDeque<oneshot::Sender<Result<T, TransportError>>>;

struct Script<N> {
    network_available: bool,
    connect_replies: VecDeque<Result<(), TransportError>>,
    acknowledge_replies: VecDeque<Result<(), TransportError>>,
    product_replies: VecDeque<Result<N, TransportError>>,
    purchase_replies: VecDeque<Result<Option<N>, TransportError>>,
    restore_replies: VecDeque<Result<Vec<N>, TransportError>>,
    parked_products: Parked<N>,
    parked_purchases: Parked<Option<N>>,
    parked_restores: Parked<Vec<N>>,
    sink: Option<CallbackSink<N>>,
    calls: Vec<TransportCall>,
}

/// Scripted [`BillingTransport`] over any native payload type.
///
/// Clones share one script: keep a clone in the test and hand the other to
/// the controller.
pub struct ScriptedTransport<N> {
    script: Arc<Mutex<Script<N>>>,
    recorded: Arc<Notify>,
}

impl<N> Clone for ScriptedTransport<N> {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            recorded: Arc::clone(&self.recorded),
        }
    }
}

impl<N> Default for ScriptedTransport<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> ScriptedTransport<N> {
    /// An online store that connects successfully and parks every request.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                network_available: true,
                connect_replies: VecDeque::new(),
                acknowledge_replies: VecDeque::new(),
                product_replies: VecDeque::new(),
                purchase_replies: VecDeque::new(),
                restore_replies: VecDeque::new(),
                parked_products: VecDeque::new(),
                parked_purchases: VecDeque::new(),
                parked_restores: VecDeque::new(),
                sink: None,
                calls: Vec::new(),
            })),
            recorded: Arc::new(Notify::new()),
        }
    }

    /// A device without connectivity.
    pub fn offline() -> Self {
        let transport = Self::new();
        transport.set_network_available(false);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, Script<N>> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, script: &mut Script<N>, call: TransportCall) {
        script.calls.push(call);
        self.recorded.notify_waiters();
    }

    pub fn set_network_available(&self, available: bool) {
        self.lock().network_available = available;
    }

    pub fn script_connect(&self, reply: Result<(), TransportError>) {
        self.lock().connect_replies.push_back(reply);
    }

    pub fn script_acknowledge(&self, reply: Result<(), TransportError>) {
        self.lock().acknowledge_replies.push_back(reply);
    }

    pub fn script_products(&self, reply: Result<N, TransportError>) {
        self.lock().product_replies.push_back(reply);
    }

    pub fn script_purchase(&self, reply: Result<Option<N>, TransportError>) {
        self.lock().purchase_replies.push_back(reply);
    }

    pub fn script_restore(&self, reply: Result<Vec<N>, TransportError>) {
        self.lock().restore_replies.push_back(reply);
    }

    /// Answer the oldest parked product request. `false` when none is parked.
    pub fn release_products(&self, reply: Result<N, TransportError>) -> bool {
        release(&mut self.lock().parked_products, reply)
    }

    pub fn release_purchase(&self, reply: Result<Option<N>, TransportError>) -> bool {
        release(&mut self.lock().parked_purchases, reply)
    }

    pub fn release_restore(&self, reply: Result<Vec<N>, TransportError>) -> bool {
        release(&mut self.lock().parked_restores, reply)
    }

    /// Push a payload through the sink of the latest connection.
    ///
    /// `false` when never connected or the controller is gone.
    pub fn push(&self, native: N) -> bool {
        let sink = self.lock().sink.clone();
        sink.is_some_and(|sink| sink.push(native))
    }

    /// Sink handed over by the latest `connect`.
    pub fn sink(&self) -> Option<CallbackSink<N>> {
        self.lock().sink.clone()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&TransportCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| matches(c)).count()
    }

    /// Wait until at least `n` recorded calls satisfy `matches`.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_calls(
        &self,
        n: usize,
        timeout: Duration,
        matches: impl Fn(&TransportCall) -> bool,
    ) -> bool {
        let wait = async {
            loop {
                let notified = self.recorded.notified();
                if self.count(&matches) >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

fn release<T>(parked: &mut Parked<T>, reply: Result<T, TransportError>) -> bool {
    match parked.pop_front() {
        Some(waiter) => waiter.send(reply).is_ok(),
        None => false,
    }
}

async fn answer<T>(
    scripted: Option<Result<T, TransportError>>,
    parked: Option<oneshot::Receiver<Result<T, TransportError>>>,
) -> Result<T, TransportError> {
    if let Some(reply) = scripted {
        return reply;
    }
    match parked {
        Some(rx) => rx.await.unwrap_or_else(|_| {
            Err(TransportError::new(
                TRANSPORT_UNAVAILABLE_CODE,
                "scripted transport dropped",
            ))
        }),
        None => Err(TransportError::new(
            TRANSPORT_UNAVAILABLE_CODE,
            "no scripted reply",
        )),
    }
}

/// Take a scripted reply or park a new waiter, atomically with recording the call.
macro_rules! script_or_park {
    ($self:ident, $call:expr, $replies:ident, $parked:ident) => {{
        let mut script = $self.lock();
        $self.record(&mut script, $call);
        match script.$replies.pop_front() {
            Some(reply) => (Some(reply), None),
            None => {
                let (tx, rx) = oneshot::channel();
                script.$parked.push_back(tx);
                (None, Some(rx))
            }
        }
    }};
}

#[async_trait]
impl<N> BillingTransport for ScriptedTransport<N>
where
    N: Send + core::fmt::Debug + 'static,
{
    type Native = N;

    fn network_available(&self) -> bool {
        self.lock().network_available
    }

    async fn connect(&self, _config: &BillingConfig, sink: CallbackSink<N>) -> Result<(), TransportError> {
        let mut script = self.lock();
        let generation = sink.generation();
        script.sink = Some(sink);
        self.record(&mut script, TransportCall::Connect { generation });
        script.connect_replies.pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) {
        let mut script = self.lock();
        script.sink = None;
        self.record(&mut script, TransportCall::Disconnect);
    }

    async fn request_products(
        &self,
        product_ids: &[ProductId],
        _item_type: ItemType,
    ) -> Result<N, TransportError> {
        let (scripted, parked) = script_or_park!(
            self,
            TransportCall::RequestProducts(product_ids.to_vec()),
            product_replies,
            parked_products
        );
        answer(scripted, parked).await
    }

    async fn request_purchase(
        &self,
        product_id: &ProductId,
        _item_type: ItemType,
        developer_payload: &str,
    ) -> Result<Option<N>, TransportError> {
        let (scripted, parked) = script_or_park!(
            self,
            TransportCall::RequestPurchase {
                product_id: product_id.clone(),
                developer_payload: developer_payload.to_string(),
            },
            purchase_replies,
            parked_purchases
        );
        answer(scripted, parked).await
    }

    async fn request_restore(&self, _item_type: ItemType) -> Result<Vec<N>, TransportError> {
        let (scripted, parked) = script_or_park!(
            self,
            TransportCall::RequestRestore,
            restore_replies,
            parked_restores
        );
        answer(scripted, parked).await
    }

    async fn acknowledge(&self, order_id: &OrderId) -> Result<(), TransportError> {
        let mut script = self.lock();
        self.record(&mut script, TransportCall::Acknowledge(order_id.clone()));
        script.acknowledge_replies.pop_front().unwrap_or(Ok(()))
    }

    async fn handle_activity_result(&self, result: ActivityResult) -> Result<(), TransportError> {
        let mut script = self.lock();
        self.record(&mut script, TransportCall::ActivityResult(result));
        Ok(())
    }
}
