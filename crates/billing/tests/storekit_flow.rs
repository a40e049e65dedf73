//! Controller behaviour over a scripted StoreKit transport, where results
//! arrive as notifications pushed through the callback sink.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use billingflow_billing::normalizer::storekit::{PAYMENT_CANCELLED, names};
use billingflow_billing::testing::{ScriptedTransport, TransportCall};
use billingflow_billing::{
    BillingConfig, BillingEvent, ConnectionState, PurchaseFlow, PurchaseOutcome,
    StoreKitNormalizer, StoreKitNotification,
};
use billingflow_catalog::{InMemoryLedger, PurchaseLedger};
use billingflow_core::{OrderId, ProductId};

const WAIT: Duration = Duration::from_secs(2);

const PRODUCT: &str = "com.yourcompany.practicemode";

fn product_id() -> ProductId {
    ProductId::new(PRODUCT).unwrap()
}

fn transaction(id: &str) -> serde_json::Value {
    json!({
        "transactionIdentifier": id,
        "productIdentifier": PRODUCT,
        "transactionDate": 700000000.25,
        "transactionReceipt": "base64-receipt"
    })
}

fn restored(id: &str, original_id: &str) -> StoreKitNotification {
    StoreKitNotification::new(
        names::RESTORE_PRODUCTS,
        Some(json!({
            "transaction": {
                "transactionIdentifier": id,
                "productIdentifier": PRODUCT,
                "transactionDate": 750000000.0,
                "originalTransaction": {
                    "transactionIdentifier": original_id,
                    "transactionDate": 700000000.0
                }
            }
        })),
    )
}

#[tokio::test]
async fn storekit_purchase_restore_and_cancel() {
    let transport: ScriptedTransport<StoreKitNotification> = ScriptedTransport::new();
    let ledger = Arc::new(InMemoryLedger::new());
    let client = PurchaseFlow::spawn(transport.clone(), StoreKitNormalizer::new(), ledger.clone());
    let mut events = client.subscribe();

    transport.script_products(Ok(StoreKitNotification::new(
        names::QUERY_INVENTORY,
        Some(json!({
            (PRODUCT): {
                "localizedTitle": "Practice Mode",
                "localizedDescription": "Unlimited practice rounds",
                "localizedPrice": "$1.99",
                "currencyCode": "USD"
            }
        })),
    )));
    client.initialize(BillingConfig::new([product_id()])).await.unwrap();
    assert_eq!(client.settled_state().await, ConnectionState::Connected);

    let BillingEvent::InventoryLoaded(loaded) = events.recv_timeout(WAIT).await.unwrap().into_payload()
    else {
        panic!("expected InventoryLoaded");
    };
    assert_eq!(loaded.products[0].price, "$1.99");

    // Purchase answered later through the notification center.
    let pending = client.purchase_product(product_id()).await.unwrap();
    assert!(
        transport
            .wait_for_calls(1, WAIT, |c| matches!(c, TransportCall::RequestPurchase { .. }))
            .await
    );
    assert!(transport.release_purchase(Ok(None)));
    assert!(transport.push(StoreKitNotification::new(
        names::PURCHASE_PRODUCT,
        Some(json!({ "transaction": transaction("1000000001") })),
    )));

    let PurchaseOutcome::Purchased(purchase) = pending.outcome().await.unwrap() else {
        panic!("expected a purchase");
    };
    assert_eq!(purchase.order_id().as_str(), "1000000001");
    assert_eq!(purchase.payload().data.as_deref(), Some("base64-receipt"));
    assert!(matches!(
        events.recv_timeout(WAIT).await.unwrap().into_payload(),
        BillingEvent::PurchaseCompleted(_)
    ));

    // Restore: transactions are pushed, completion is the finished notification.
    let (count, _) = tokio::join!(client.restore_products(), async {
        assert!(
            transport
                .wait_for_calls(1, WAIT, |c| matches!(c, TransportCall::RequestRestore))
                .await
        );
        assert!(transport.push(restored("2000000001", "1000000001")));
        assert!(transport.push(restored("2000000002", "1000000002")));
        assert!(transport.push(StoreKitNotification::new(
            names::RESTORE_PRODUCTS_FINISHED,
            None
        )));
    });
    assert_eq!(count.unwrap(), 1);
    assert_eq!(ledger.len(), 2);
    assert!(ledger.contains(&OrderId::new("1000000002").unwrap()));

    let BillingEvent::RestoreCompleted(completed) = events.recv_timeout(WAIT).await.unwrap().into_payload()
    else {
        panic!("expected RestoreCompleted");
    };
    assert_eq!(completed.count, 1);

    // The transport resolving afterwards changes nothing.
    assert!(transport.release_restore(Ok(vec![])));

    // Cancellation still finishes the failed transaction.
    let pending = client.purchase_product(product_id()).await.unwrap();
    assert!(
        transport
            .wait_for_calls(2, WAIT, |c| matches!(c, TransportCall::RequestPurchase { .. }))
            .await
    );
    assert!(transport.push(StoreKitNotification::new(
        names::PURCHASE_PRODUCT_ERROR,
        Some(json!({
            "transaction": {
                "transactionIdentifier": "1000000003",
                "productIdentifier": PRODUCT,
                "error": { "code": PAYMENT_CANCELLED }
            }
        })),
    )));

    assert_eq!(pending.outcome().await.unwrap(), PurchaseOutcome::Canceled);
    assert!(matches!(
        events.recv_timeout(WAIT).await.unwrap().into_payload(),
        BillingEvent::UserCanceled(_)
    ));
    let cancelled = OrderId::new("1000000003").unwrap();
    assert!(
        transport
            .wait_for_calls(1, WAIT, |c| *c == TransportCall::Acknowledge(cancelled.clone()))
            .await
    );
    assert_eq!(ledger.len(), 2);
}

#[tokio::test]
async fn storekit_inventory_without_user_info_is_an_inventory_error() {
    let transport: ScriptedTransport<StoreKitNotification> = ScriptedTransport::new();
    transport.script_products(Ok(StoreKitNotification::new(names::QUERY_INVENTORY, None)));
    let client = PurchaseFlow::spawn(
        transport.clone(),
        StoreKitNormalizer::new(),
        Arc::new(InMemoryLedger::new()),
    );
    let mut events = client.subscribe();

    client.initialize(BillingConfig::new([product_id()])).await.unwrap();

    let event = events.recv_timeout(WAIT).await.unwrap().into_payload();
    assert!(matches!(event, BillingEvent::InventoryError(_)));
    assert!(client.products().is_empty());
}
