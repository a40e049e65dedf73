//! Walks a billing session against a scripted Play store and prints every
//! published event as a JSON line.
//!
//! Product ids come from `BILLING_PRODUCT_IDS`; `practicemode` when unset.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use billingflow_billing::normalizer::play::response;
use billingflow_billing::testing::ScriptedTransport;
use billingflow_billing::{
    BillingConfig, BillingEnvelope, PlayBillingNormalizer, PlayCallback, PurchaseFlow,
    PurchaseOutcome, SkuDetails,
};
use billingflow_catalog::InMemoryLedger;
use billingflow_core::ProductId;
use billingflow_events::Subscription;

const SETTLE: Duration = Duration::from_millis(200);

fn sku(product_id: &ProductId) -> SkuDetails {
    SkuDetails {
        product_id: product_id.as_str().to_string(),
        item_type: "inapp".to_string(),
        price: "$1.99".to_string(),
        price_currency_code: "USD".to_string(),
        title: product_id.as_str().to_string(),
        description: format!("Sandbox listing for {product_id}"),
    }
}

fn purchase_data(product_id: &ProductId, order_id: &str, developer_payload: &str) -> String {
    serde_json::json!({
        "orderId": order_id,
        "packageName": "com.example.sandbox",
        "productId": product_id.as_str(),
        "purchaseTime": 1_700_000_000_000_i64,
        "purchaseState": 0,
        "developerPayload": developer_payload,
        "purchaseToken": format!("token-{order_id}"),
    })
    .to_string()
}

fn purchased(product_id: &ProductId, order_id: &str, developer_payload: &str) -> PlayCallback {
    PlayCallback::ProductPurchased {
        response_code: response::OK,
        purchase_data: purchase_data(product_id, order_id, developer_payload),
        signature: format!("sig-{order_id}"),
    }
}

async fn print_events(events: &mut Subscription<BillingEnvelope>) -> anyhow::Result<()> {
    while let Some(envelope) = events.recv_timeout(SETTLE).await {
        println!("{}", serde_json::to_string(&envelope)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    billingflow_observability::init();

    let mut config = BillingConfig::from_env().context("invalid billing configuration")?;
    if config.product_ids.is_empty() {
        config.product_ids.insert(ProductId::new("practicemode")?);
    }
    let product = config
        .product_ids
        .iter()
        .next()
        .cloned()
        .context("no product configured")?;

    let transport: ScriptedTransport<PlayCallback> = ScriptedTransport::new();
    transport.script_products(Ok(PlayCallback::SkuDetailsLoaded(
        config.product_ids.iter().map(sku).collect(),
    )));
    transport.script_purchase(Ok(Some(purchased(
        &product,
        "GPA.1234-5678-9012-34567",
        &config.developer_payload,
    ))));
    transport.script_restore(Ok(vec![PlayCallback::OwnedItems {
        purchase_data_list: [
            "GPA.1234-5678-9012-34567",
            "GPA.2222-3333-4444-55555",
        ]
        .iter()
        .map(|order_id| purchase_data(&product, order_id, &config.developer_payload))
        .collect(),
        signature_list: vec!["sig-a".to_string(), "sig-b".to_string()],
    }]));

    let ledger = Arc::new(InMemoryLedger::new());
    let client = PurchaseFlow::spawn(transport.clone(), PlayBillingNormalizer::new(), ledger.clone());
    let mut events = client.subscribe();

    let state = client.initialize(config.clone()).await?;
    tracing::info!(session_id = %client.session_id(), ?state, "billing session started");
    print_events(&mut events).await?;

    let pending = client.purchase_product(product.clone()).await?;
    match pending.outcome().await? {
        PurchaseOutcome::Purchased(purchase) => {
            tracing::info!(order_id = %purchase.order_id(), "purchase recorded")
        }
        other => tracing::warn!(?other, "purchase did not complete"),
    }

    // The store redelivering the same order must not publish a second completion.
    transport.push(purchased(
        &product,
        "GPA.1234-5678-9012-34567",
        &config.developer_payload,
    ));
    print_events(&mut events).await?;

    let restored = client.restore_products().await?;
    tracing::info!(restored, ledger_size = ledger.len(), "restore finished");
    print_events(&mut events).await?;

    client.shutdown().await;
    Ok(())
}
