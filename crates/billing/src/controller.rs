//! Purchase flow controller.
//!
//! One tokio task ([`PurchaseFlow`]) owns the connection, the pending
//! requests, the dedup sets and the write side of the catalog. Application
//! code talks to it through a cloneable [`BillingClient`]: every call is a
//! command posted to the task's queue and answered over a oneshot channel.
//! Transport calls run in their own tasks and post their completion back to
//! the same task, tagged with the connection generation that issued them.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use billingflow_catalog::{
    CatalogWriter, LedgerError, Product, ProductCatalog, Purchase, PurchaseLedger, Recorded,
};
use billingflow_core::{OrderId, ProductId, RequestId, SessionId};
use billingflow_events::{
    EnvelopeSequencer, Event, EventBus, EventEnvelope, InMemoryEventBus, Subscription, execute,
};

use crate::config::BillingConfig;
use crate::connection::{Connection, ConnectionCommand, ConnectionEvent, ConnectionState};
use crate::error::{BillingError, TransportError};
use crate::event::BillingEvent;
use crate::normalizer::{Normalize, Origin, Signal};
use crate::pending::{Admission, Answer, PendingRequests, PurchaseOutcome, PurchaseRequest};
use crate::transport::{ActivityResult, BillingTransport, CallbackSink};

/// Envelope type delivered to subscribers.
pub type BillingEnvelope = EventEnvelope<BillingEvent>;

type Bus = InMemoryEventBus<BillingEnvelope>;

enum Command {
    Initialize {
        config: BillingConfig,
        reply: oneshot::Sender<ConnectionState>,
    },
    QueryInventory {
        product_ids: Vec<ProductId>,
        reply: oneshot::Sender<Result<Answer<Vec<Product>>, BillingError>>,
    },
    Purchase {
        product_id: ProductId,
        reply: oneshot::Sender<Result<(RequestId, Answer<PurchaseOutcome>), BillingError>>,
    },
    Restore {
        reply: oneshot::Sender<Result<Answer<usize>, BillingError>>,
    },
    ActivityResult {
        result: ActivityResult,
        reply: oneshot::Sender<Result<(), BillingError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Transport completions and pushed payloads, tagged with their generation.
enum Inbound<N> {
    Connected {
        generation: u64,
        result: Result<(), TransportError>,
    },
    Products {
        generation: u64,
        request_id: RequestId,
        result: Result<N, TransportError>,
    },
    PurchaseStarted {
        generation: u64,
        request_id: RequestId,
        product_id: ProductId,
        result: Result<Option<N>, TransportError>,
    },
    Restore {
        generation: u64,
        request_id: RequestId,
        result: Result<Vec<N>, TransportError>,
    },
    Pushed {
        generation: u64,
        native: N,
    },
    Acknowledged {
        generation: u64,
        order_id: OrderId,
        result: Result<(), TransportError>,
    },
}

impl<N> Inbound<N> {
    fn generation(&self) -> u64 {
        match self {
            Inbound::Connected { generation, .. }
            | Inbound::Products { generation, .. }
            | Inbound::PurchaseStarted { generation, .. }
            | Inbound::Restore { generation, .. }
            | Inbound::Pushed { generation, .. }
            | Inbound::Acknowledged { generation, .. } => *generation,
        }
    }
}

/// Application-facing handle to a running [`PurchaseFlow`].
///
/// Cheap to clone. The controller task stops once every handle is dropped.
#[derive(Clone)]
pub struct BillingClient {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    bus: Arc<Bus>,
    catalog: ProductCatalog,
    ledger: Arc<dyn PurchaseLedger>,
}

impl core::fmt::Debug for BillingClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BillingClient")
            .field("session_id", &self.session_id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl BillingClient {
    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BillingError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| BillingError::Closed)?;
        rx.await.map_err(|_| BillingError::Closed)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Connect to the billing service.
    ///
    /// No-op while connecting or connected. Without connectivity the
    /// controller moves to `Failed` and emits `ConnectionFailed`; that is not
    /// an error for the caller. Returns the state right after the call; use
    /// [`settled_state`](Self::settled_state) to wait for the outcome.
    pub async fn initialize(&self, config: BillingConfig) -> Result<ConnectionState, BillingError> {
        self.call(|reply| Command::Initialize { config, reply }).await
    }

    /// Query the store for `product_ids` (the configured ids when empty).
    ///
    /// Joins a query already in flight instead of issuing another.
    pub async fn query_inventory(
        &self,
        product_ids: impl IntoIterator<Item = ProductId>,
    ) -> Result<Vec<Product>, BillingError> {
        let product_ids: Vec<ProductId> = product_ids.into_iter().collect();
        let answer = self
            .call(|reply| Command::QueryInventory { product_ids, reply })
            .await??;
        answer.await.map_err(|_| BillingError::Closed)?
    }

    /// Start a purchase; the returned handle resolves when the platform answers.
    pub async fn purchase_product(&self, product_id: ProductId) -> Result<PendingPurchase, BillingError> {
        let requested = product_id.clone();
        let (request_id, outcome) = self
            .call(|reply| Command::Purchase {
                product_id: requested,
                reply,
            })
            .await??;
        Ok(PendingPurchase {
            request_id,
            product_id,
            outcome,
        })
    }

    /// Restore prior purchases; resolves to the number newly recorded.
    pub async fn restore_products(&self) -> Result<usize, BillingError> {
        let answer = self.call(|reply| Command::Restore { reply }).await??;
        answer.await.map_err(|_| BillingError::Closed)?
    }

    /// Release the connection and close every subscription. Safe to repeat.
    pub async fn shutdown(&self) {
        if self.call(|reply| Command::Shutdown { reply }).await.is_err() {
            debug!(session_id = %self.session_id, "shutdown after controller stopped");
        }
    }

    /// Forward the host's activity result to the transport.
    pub async fn handle_activity_result(&self, result: ActivityResult) -> Result<(), BillingError> {
        self.call(|reply| Command::ActivityResult { result, reply })
            .await?
    }

    pub fn subscribe(&self) -> Subscription<BillingEnvelope> {
        self.bus.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection leaves `Connecting`.
    pub async fn settled_state(&self) -> ConnectionState {
        let mut state = self.state.clone();
        let settled = match state.wait_for(|s| *s != ConnectionState::Connecting).await {
            Ok(s) => Some(*s),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| *state.borrow())
    }

    pub fn products(&self) -> ProductCatalog {
        self.catalog.clone()
    }

    pub fn ledger(&self) -> Arc<dyn PurchaseLedger> {
        Arc::clone(&self.ledger)
    }
}

/// A purchase accepted by the controller and awaiting the platform.
#[derive(Debug)]
pub struct PendingPurchase {
    request_id: RequestId,
    product_id: ProductId,
    outcome: Answer<PurchaseOutcome>,
}

impl PendingPurchase {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub async fn outcome(self) -> Result<PurchaseOutcome, BillingError> {
        self.outcome.await.map_err(|_| BillingError::Closed)?
    }
}

/// The controller task.
pub struct PurchaseFlow<T, N>
where
    T: BillingTransport,
    N: Normalize<Native = T::Native>,
{
    transport: Arc<T>,
    normalizer: N,
    ledger: Arc<dyn PurchaseLedger>,
    catalog: CatalogWriter,
    products: ProductCatalog,
    bus: Arc<Bus>,
    sequencer: EnvelopeSequencer,
    connection: Connection,
    state: watch::Sender<ConnectionState>,
    config: BillingConfig,
    pending: PendingRequests,
    /// Orders already handled this session (recorded, failed or canceled).
    settled: HashSet<OrderId>,
    acknowledged: HashSet<OrderId>,
    acknowledging: HashSet<OrderId>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedReceiver<Inbound<T::Native>>,
    inbound_tx: mpsc::UnboundedSender<Inbound<T::Native>>,
}

impl<T, N> PurchaseFlow<T, N>
where
    T: BillingTransport,
    N: Normalize<Native = T::Native>,
{
    /// Start a controller on the current tokio runtime.
    pub fn spawn(transport: T, normalizer: N, ledger: Arc<dyn PurchaseLedger>) -> BillingClient {
        let session_id = SessionId::new();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (catalog, products) = ProductCatalog::new();
        let bus = Arc::new(Bus::new());

        let flow = Self {
            transport: Arc::new(transport),
            normalizer,
            ledger: Arc::clone(&ledger),
            catalog,
            products: products.clone(),
            bus: Arc::clone(&bus),
            sequencer: EnvelopeSequencer::new(session_id),
            connection: Connection::new(session_id),
            state,
            config: BillingConfig::default(),
            pending: PendingRequests::new(),
            settled: HashSet::new(),
            acknowledged: HashSet::new(),
            acknowledging: HashSet::new(),
            commands,
            inbound,
            inbound_tx,
        };
        tokio::spawn(flow.run());

        BillingClient {
            session_id,
            commands: commands_tx,
            state: state_rx,
            bus,
            catalog: products,
            ledger,
        }
    }

    async fn run(mut self) {
        let session_id = self.sequencer.session_id();
        info!(%session_id, platform = self.normalizer.platform(), "purchase flow started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(inbound) = self.inbound.recv() => self.on_inbound(inbound),
            }
        }

        if self.connection.state() != ConnectionState::Disconnected {
            self.pending.fail_all(BillingError::Closed);
            if let Err(error) = execute(&mut self.connection, &ConnectionCommand::Shutdown) {
                debug!(%error, "connection already closed");
            }
            self.state.send_replace(self.connection.state());
            self.transport.disconnect().await;
        }
        info!(%session_id, "purchase flow stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Initialize { config, reply } => {
                let _ = reply.send(self.initialize(config));
            }
            Command::QueryInventory { product_ids, reply } => {
                let _ = reply.send(self.query_inventory(product_ids));
            }
            Command::Purchase { product_id, reply } => {
                let _ = reply.send(self.purchase(product_id));
            }
            Command::Restore { reply } => {
                let _ = reply.send(self.restore());
            }
            Command::ActivityResult { result, reply } => self.forward_activity_result(result, reply),
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn initialize(&mut self, config: BillingConfig) -> ConnectionState {
        let network_available = self.transport.network_available();
        let events = match execute(
            &mut self.connection,
            &ConnectionCommand::Initialize { network_available },
        ) {
            Ok(events) => events,
            Err(error) => {
                warn!(%error, "initialize rejected");
                return self.connection.state();
            }
        };

        if events.is_empty() {
            debug!(state = ?self.connection.state(), "initialize ignored; connection already live");
            return self.connection.state();
        }

        self.config = config;
        for event in events {
            self.on_connection_event(event);
        }
        self.connection.state()
    }

    fn query_inventory(
        &mut self,
        product_ids: Vec<ProductId>,
    ) -> Result<Answer<Vec<Product>>, BillingError> {
        self.ensure_connected()?;
        let product_ids = if product_ids.is_empty() {
            self.config.product_ids.iter().cloned().collect()
        } else {
            product_ids
        };
        Ok(self.start_inventory(product_ids))
    }

    fn start_inventory(&mut self, product_ids: Vec<ProductId>) -> Answer<Vec<Product>> {
        let (admission, answer) = self.pending.join_inventory();
        if let Admission::Issued(request_id) = admission {
            debug!(%request_id, products = product_ids.len(), "querying inventory");
            let generation = self.connection.generation();
            let transport = Arc::clone(&self.transport);
            let item_type = self.config.item_type;
            self.spawn_call(async move {
                let result = transport.request_products(&product_ids, item_type).await;
                Inbound::Products {
                    generation,
                    request_id,
                    result,
                }
            });
        }
        answer
    }

    fn purchase(
        &mut self,
        product_id: ProductId,
    ) -> Result<(RequestId, Answer<PurchaseOutcome>), BillingError> {
        self.ensure_connected()?;
        let (request_id, answer) = self
            .pending
            .begin_purchase(product_id.clone())
            .inspect_err(|_| debug!(%product_id, "purchase already in flight"))?;

        info!(%product_id, %request_id, "purchase requested");
        let generation = self.connection.generation();
        let transport = Arc::clone(&self.transport);
        let item_type = self
            .products
            .get(&product_id)
            .map(|p| p.item_type)
            .unwrap_or(self.config.item_type);
        let developer_payload = self.config.developer_payload.clone();
        self.spawn_call(async move {
            let result = transport
                .request_purchase(&product_id, item_type, &developer_payload)
                .await;
            Inbound::PurchaseStarted {
                generation,
                request_id,
                product_id,
                result,
            }
        });
        Ok((request_id, answer))
    }

    fn restore(&mut self) -> Result<Answer<usize>, BillingError> {
        self.ensure_connected()?;
        let (admission, answer) = self.pending.join_restore();
        if let Admission::Issued(request_id) = admission {
            info!(%request_id, "restoring purchases");
            let generation = self.connection.generation();
            let transport = Arc::clone(&self.transport);
            let item_type = self.config.item_type;
            self.spawn_call(async move {
                let result = transport.request_restore(item_type).await;
                Inbound::Restore {
                    generation,
                    request_id,
                    result,
                }
            });
        }
        Ok(answer)
    }

    fn forward_activity_result(
        &mut self,
        result: ActivityResult,
        reply: oneshot::Sender<Result<(), BillingError>>,
    ) {
        if !self.connection.state().is_live() {
            let _ = reply.send(Err(BillingError::NotConnected));
            return;
        }
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let outcome = transport
                .handle_activity_result(result)
                .await
                .map_err(|e| BillingError::PurchaseFailed {
                    code: e.code,
                    product_id: None,
                });
            let _ = reply.send(outcome);
        });
    }

    fn shutdown(&mut self) {
        let events = match execute(&mut self.connection, &ConnectionCommand::Shutdown) {
            Ok(events) => events,
            Err(error) => {
                warn!(%error, "shutdown rejected");
                return;
            }
        };
        if events.is_empty() {
            debug!("shutdown ignored; already disconnected");
            return;
        }

        if !self.pending.is_empty() {
            info!("closing pending billing requests");
        }
        self.pending.fail_all(BillingError::Closed);
        self.acknowledging.clear();
        self.bus.unsubscribe_all();

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move { transport.disconnect().await });

        for event in events {
            self.on_connection_event(event);
        }
    }

    fn ensure_connected(&self) -> Result<(), BillingError> {
        if self.connection.state().accepts_requests() {
            Ok(())
        } else {
            Err(BillingError::NotConnected)
        }
    }

    fn spawn_call<F>(&self, call: F)
    where
        F: Future<Output = Inbound<T::Native>> + Send + 'static,
    {
        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            // The controller may have stopped meanwhile.
            let _ = inbound.send(call.await);
        });
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::ConnectStarted { generation } => {
                info!(generation, "connecting to billing service");
                let inbound = self.inbound_tx.clone();
                let sink = CallbackSink::new(generation, move |native| {
                    inbound.send(Inbound::Pushed { generation, native }).is_ok()
                });
                let transport = Arc::clone(&self.transport);
                let config = self.config.clone();
                self.spawn_call(async move {
                    let result = transport.connect(&config, sink).await;
                    Inbound::Connected { generation, result }
                });
            }
            ConnectionEvent::Connected { generation } => {
                info!(generation, "billing service connected");
            }
            ConnectionEvent::ConnectFailed { reason } => {
                warn!(reason = %reason, "billing connection failed");
                self.pending
                    .fail_all(BillingError::ConnectionFailed(reason.clone()));
                self.acknowledging.clear();
                self.emit(BillingEvent::connection_failed(reason));
            }
            ConnectionEvent::Disconnected => {
                info!("billing service disconnected");
            }
        }
        self.state.send_replace(self.connection.state());
    }

    fn on_inbound(&mut self, inbound: Inbound<T::Native>) {
        let generation = inbound.generation();
        if !self.connection.is_current(generation) {
            debug!(
                generation,
                current = self.connection.generation(),
                "dropping stale transport callback"
            );
            return;
        }

        match inbound {
            Inbound::Connected { result, .. } => self.on_connected(generation, result),
            Inbound::Products {
                request_id, result, ..
            } => self.on_products(request_id, result),
            Inbound::PurchaseStarted {
                request_id,
                product_id,
                result,
                ..
            } => self.on_purchase_started(request_id, product_id, result),
            Inbound::Restore {
                request_id, result, ..
            } => self.on_restore(request_id, result),
            Inbound::Pushed { native, .. } => self.dispatch(&Origin::Unsolicited, native),
            Inbound::Acknowledged {
                order_id, result, ..
            } => self.on_acknowledged(order_id, result),
        }
    }

    fn on_connected(&mut self, generation: u64, result: Result<(), TransportError>) {
        let command = match result {
            Ok(()) => ConnectionCommand::MarkConnected { generation },
            Err(error) => ConnectionCommand::MarkFailed {
                generation,
                reason: error.to_string(),
            },
        };
        let mut connected = false;
        match execute(&mut self.connection, &command) {
            Ok(events) => {
                for event in events {
                    connected |= matches!(event, ConnectionEvent::Connected { .. });
                    self.on_connection_event(event);
                }
            }
            Err(error) => debug!(%error, "ignoring connection callback"),
        }

        if connected && !self.config.product_ids.is_empty() {
            let product_ids = self.config.product_ids.iter().cloned().collect();
            // Results arrive as events; nobody awaits this answer.
            drop(self.start_inventory(product_ids));
        }
    }

    fn on_products(&mut self, request_id: RequestId, result: Result<T::Native, TransportError>) {
        if self.pending.inventory_id() != Some(request_id) {
            debug!(%request_id, "dropping response for settled inventory query");
            return;
        }

        match result {
            Ok(native) => self.dispatch(&Origin::Inventory, native),
            Err(error) => {
                warn!(code = error.code, error = %error.message, "inventory query failed");
                self.apply(Signal::InventoryFailed {
                    code: error.code,
                    message: Some(error.message),
                });
            }
        }

        if self.pending.inventory_id() == Some(request_id) {
            self.apply(crate::normalizer::malformed(
                self.normalizer.platform(),
                &Origin::Inventory,
                "inventory response produced no products",
            ));
        }
    }

    fn on_purchase_started(
        &mut self,
        request_id: RequestId,
        product_id: ProductId,
        result: Result<Option<T::Native>, TransportError>,
    ) {
        if self.pending.purchase_id(&product_id) != Some(request_id) {
            debug!(%request_id, %product_id, "purchase already settled by a pushed callback");
            return;
        }

        match result {
            Ok(Some(native)) => self.dispatch(&Origin::Purchase(product_id), native),
            Ok(None) => debug!(%request_id, %product_id, "purchase handed to the platform"),
            Err(error) => {
                warn!(%product_id, code = error.code, error = %error.message, "purchase request failed");
                self.apply(Signal::PurchaseFailed {
                    code: error.code,
                    product_id: Some(product_id),
                    order_id: None,
                });
            }
        }
    }

    fn on_restore(&mut self, request_id: RequestId, result: Result<Vec<T::Native>, TransportError>) {
        let current = self.pending.restore_id() == Some(request_id);

        match result {
            Ok(natives) => {
                let origin = if current {
                    Origin::Restore
                } else {
                    Origin::Unsolicited
                };
                for native in natives {
                    self.dispatch(&origin, native);
                }
                if self.pending.restore_id() == Some(request_id) {
                    self.complete_restore();
                }
            }
            Err(error) if current => {
                warn!(code = error.code, error = %error.message, "restore failed");
                self.apply(Signal::RestoreFailed { code: error.code });
            }
            Err(error) => debug!(%request_id, %error, "dropping failure of settled restore"),
        }
    }

    fn on_acknowledged(&mut self, order_id: OrderId, result: Result<(), TransportError>) {
        self.acknowledging.remove(&order_id);
        match result {
            Ok(()) => {
                debug!(%order_id, "transaction acknowledged");
                self.acknowledged.insert(order_id);
            }
            // The platform redelivers unacknowledged transactions; the next
            // delivery retries.
            Err(error) => warn!(%order_id, code = error.code, error = %error.message, "acknowledge failed"),
        }
    }

    fn dispatch(&mut self, origin: &Origin, native: T::Native) {
        for signal in self.normalizer.normalize(origin, native) {
            match (origin, signal) {
                (Origin::Purchase(requested), Signal::Purchased(purchase)) => {
                    self.on_purchased(purchase, Some(requested))
                }
                (_, signal) => self.apply(signal),
            }
        }
    }

    fn apply(&mut self, signal: Signal) {
        match signal {
            Signal::InventoryLoaded(products) => {
                info!(count = products.len(), "inventory loaded");
                self.catalog.replace(products.clone());
                self.emit(BillingEvent::inventory_loaded(products.clone()));
                if let Some(request) = self.pending.take_inventory() {
                    request.resolve(Ok(products));
                }
            }
            Signal::InventoryFailed { code, message } => {
                self.emit(BillingEvent::inventory_error(code, message.clone()));
                if let Some(request) = self.pending.take_inventory() {
                    request.resolve(Err(BillingError::InventoryQueryFailed { code, message }));
                }
            }
            Signal::Purchased(purchase) => self.on_purchased(purchase, None),
            Signal::Restored(purchase) => self.on_restored(purchase),
            Signal::PurchaseFailed {
                code,
                product_id,
                order_id,
            } => self.on_purchase_failed(code, product_id, order_id),
            Signal::Canceled {
                product_id,
                order_id,
            } => self.on_canceled(product_id, order_id),
            Signal::RestoreFinished => {
                if self.pending.restore_id().is_some() {
                    self.complete_restore();
                } else {
                    debug!("restore finished with no restore pending");
                }
            }
            Signal::RestoreFailed { code } => {
                self.emit(BillingEvent::restore_error(code));
                if let Some(request) = self.pending.take_restore() {
                    request.resolve(Err(BillingError::RestoreFailed { code }));
                }
            }
            Signal::ProcessingError(message) => {
                warn!(message = %message, "billing processing error");
                self.emit(BillingEvent::processing_error(message));
            }
            Signal::ConnectionLost(reason) => {
                let command = ConnectionCommand::MarkFailed {
                    generation: self.connection.generation(),
                    reason,
                };
                match execute(&mut self.connection, &command) {
                    Ok(events) => {
                        for event in events {
                            self.on_connection_event(event);
                        }
                    }
                    Err(error) => debug!(%error, "ignoring connection loss"),
                }
            }
        }
    }

    /// Write `purchase` to the ledger at most once per order id, then
    /// acknowledge it. Nothing is acknowledged when the write fails.
    fn commit(&mut self, purchase: &Purchase) -> Result<Recorded, LedgerError> {
        let order_id = purchase.order_id();
        let recorded = if self.settled.contains(order_id) || self.ledger.contains(order_id) {
            Recorded::AlreadyPresent
        } else {
            self.ledger.record(purchase.clone())?
        };
        self.settled.insert(order_id.clone());
        self.acknowledge(order_id.clone());
        Ok(recorded)
    }

    /// `answering` names the product whose purchase request returned this
    /// purchase inline; pushed purchases carry `None`.
    fn on_purchased(&mut self, purchase: Purchase, answering: Option<&ProductId>) {
        let order_id = purchase.order_id().clone();
        let product_id = purchase.product_id().clone();

        match self.commit(&purchase) {
            Ok(Recorded::Appended) => {
                info!(%order_id, %product_id, "purchase recorded");
                self.emit(BillingEvent::purchase_completed(purchase.clone()));
                match self.take_answered(&product_id, answering) {
                    Some(request) => request.resolve(Ok(PurchaseOutcome::Purchased(purchase))),
                    None => info!(%product_id, "recorded unsolicited purchase"),
                }
            }
            // An inline answer is the response to its request even when the
            // order was seen before; a pushed redelivery is not.
            Ok(Recorded::AlreadyPresent) => {
                match answering.and_then(|requested| self.pending.take_purchase(requested)) {
                    Some(request) => {
                        info!(%order_id, %product_id, "purchase answered with an already recorded order");
                        request.resolve(Ok(PurchaseOutcome::Purchased(purchase)));
                    }
                    None => debug!(%order_id, %product_id, "suppressing duplicate purchase callback"),
                }
            }
            Err(error) => {
                warn!(%order_id, %product_id, %error, "ledger write failed; transaction left unacknowledged");
                self.emit(BillingEvent::processing_error(format!(
                    "could not record order {order_id}: {error}"
                )));
                if let Some(request) = self.take_answered(&product_id, answering) {
                    request.resolve(Err(BillingError::Ledger(error)));
                }
            }
        }
    }

    fn take_answered(
        &mut self,
        product_id: &ProductId,
        answering: Option<&ProductId>,
    ) -> Option<PurchaseRequest> {
        self.pending
            .take_purchase(product_id)
            .or_else(|| answering.and_then(|requested| self.pending.take_purchase(requested)))
    }

    fn on_restored(&mut self, purchase: Purchase) {
        let order_id = purchase.order_id().clone();

        match self.commit(&purchase) {
            Ok(Recorded::Appended) => {
                info!(%order_id, product_id = %purchase.product_id(), "restored purchase recorded");
                self.pending.note_restored();
            }
            Ok(Recorded::AlreadyPresent) => debug!(%order_id, "restored purchase already recorded"),
            Err(error) => {
                warn!(%order_id, %error, "ledger write failed for restored purchase");
                self.emit(BillingEvent::processing_error(format!(
                    "could not record restored order {order_id}: {error}"
                )));
            }
        }
    }

    /// Finish a failed or canceled transaction once. Returns `false` for a
    /// redelivery.
    fn settle_unrecorded(&mut self, order_id: Option<OrderId>) -> bool {
        let Some(order_id) = order_id else {
            return true;
        };
        if !self.settled.insert(order_id.clone()) {
            debug!(%order_id, "suppressing duplicate transaction callback");
            return false;
        }
        self.acknowledge(order_id);
        true
    }

    fn on_purchase_failed(&mut self, code: i32, product_id: Option<ProductId>, order_id: Option<OrderId>) {
        if !self.settle_unrecorded(order_id) {
            return;
        }
        let product_id = product_id.or_else(|| self.pending.sole_purchase());
        warn!(code, product_id = ?product_id, "purchase failed");

        self.emit(BillingEvent::purchase_error(code, product_id.clone()));
        if let Some(request) = product_id.and_then(|p| self.pending.take_purchase(&p)) {
            request.resolve(Ok(PurchaseOutcome::Failed { code }));
        }
    }

    fn on_canceled(&mut self, product_id: Option<ProductId>, order_id: Option<OrderId>) {
        if !self.settle_unrecorded(order_id) {
            return;
        }
        let product_id = product_id.or_else(|| self.pending.sole_purchase());
        info!(product_id = ?product_id, "purchase canceled by user");

        self.emit(BillingEvent::user_canceled(product_id.clone()));
        if let Some(request) = product_id.and_then(|p| self.pending.take_purchase(&p)) {
            request.resolve(Ok(PurchaseOutcome::Canceled));
        }
    }

    fn complete_restore(&mut self) {
        if let Some(request) = self.pending.take_restore() {
            let count = request.recorded();
            info!(count, "restore completed");
            self.emit(BillingEvent::restore_completed(count));
            request.resolve(Ok(count));
        }
    }

    fn acknowledge(&mut self, order_id: OrderId) {
        if self.acknowledged.contains(&order_id) || !self.acknowledging.insert(order_id.clone()) {
            return;
        }
        let generation = self.connection.generation();
        let transport = Arc::clone(&self.transport);
        self.spawn_call(async move {
            let result = transport.acknowledge(&order_id).await;
            Inbound::Acknowledged {
                generation,
                order_id,
                result,
            }
        });
    }

    fn emit(&mut self, event: BillingEvent) {
        let envelope = self.sequencer.seal(event);
        debug!(
            event_type = envelope.payload().event_type(),
            sequence_number = envelope.sequence_number(),
            "publishing billing event"
        );
        if let Err(error) = self.bus.publish(envelope) {
            warn!(?error, "failed to publish billing event");
        }
    }
}
