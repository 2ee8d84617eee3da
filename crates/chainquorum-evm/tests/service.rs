mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use chainquorum_evm::{
    ConfigError, DispatchError, DispatchedEvent, EventService, EventServiceBuilder, PollerEvent, ServiceError,
};

use common::*;

fn service(chains: &[MockChain]) -> EventService {
    let mut builder = EventServiceBuilder::new()
        .contract(market())
        .poll_interval(Duration::from_millis(20))
        .request_timeout(Duration::from_millis(100))
        .start_after(100);
    for c in chains {
        builder = builder.transport(c.endpoint(), c.transport());
    }
    builder.build().unwrap()
}

async fn next_advance(diag: &mut tokio::sync::broadcast::Receiver<PollerEvent>) -> PollerEvent {
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(2), diag.recv())
            .await
            .expect("no diagnostics")
            .expect("diagnostics closed");
        if matches!(ev, PollerEvent::Advanced { .. }) {
            return ev;
        }
    }
}

#[tokio::test]
async fn start_dispatch_stop() {
    let chains = vec![MockChain::new("p1", 105), MockChain::new("p2", 105), MockChain::new("p3", 105)];
    for c in &chains {
        c.push_log(purchase_log(103, 2, 7));
        c.put_receipt(&tx_hash(103), receipt_json(&tx_hash(103), 103));
    }
    let service = service(&chains);
    let mut diag = service.diagnostics();

    let (tx, mut rx) = mpsc::unbounded_channel();
    service
        .on("Purchase", move |ev: DispatchedEvent| {
            let tx = tx.clone();
            async move {
                let receipt = ev.receipt.get().await?;
                tx.send((ev.block_number, receipt.block_number)).ok();
                anyhow::Ok(())
            }
        })
        .unwrap();
    service.start().unwrap();
    assert_eq!(service.start(), Err(ServiceError::AlreadyStarted));
    assert!(service.is_running());

    next_advance(&mut diag).await;
    assert_eq!(rx.recv().await, Some((103, 103)));

    service.stop().await;
    assert!(!service.is_running());

    // Nothing is dispatched once stopped, even if the chain moves on.
    for c in &chains {
        c.push_log(purchase_log(106, 0, 9));
        c.set_head(106);
    }
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(
        service.on("Purchase", |_ev: DispatchedEvent| async { anyhow::Ok(()) }),
        Err(DispatchError::Closed)
    );
    assert_eq!(service.start(), Err(ServiceError::Stopped));
}

#[tokio::test]
async fn stop_cancels_pending_handler_work() {
    let chains = vec![MockChain::new("p1", 105), MockChain::new("p2", 105), MockChain::new("p3", 105)];
    for c in &chains {
        for i in 0..5 {
            c.push_log(purchase_log(103, i, 7));
        }
    }
    let service = service(&chains);
    let mut diag = service.diagnostics();
    let (tx, mut rx) = mpsc::unbounded_channel();
    service
        .on("Purchase", move |ev: DispatchedEvent| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                tx.send(ev.log_index).ok();
                anyhow::Ok(())
            }
        })
        .unwrap();
    service.start().unwrap();
    assert!(matches!(next_advance(&mut diag).await, PollerEvent::Advanced { .. }));
    service.stop().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(rx.try_recv().is_err(), "a handler completed after stop()");
}

#[tokio::test]
async fn unsubscribed_handler_stops_receiving() {
    let chains = vec![MockChain::new("p1", 105), MockChain::new("p2", 105)];
    for c in &chains {
        c.push_log(purchase_log(103, 2, 7));
    }
    let service = service(&chains);
    let mut diag = service.diagnostics();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = service
        .on("Purchase", move |ev: DispatchedEvent| {
            let tx = tx.clone();
            async move {
                tx.send(ev.block_number).ok();
                anyhow::Ok(())
            }
        })
        .unwrap();
    service.start().unwrap();
    next_advance(&mut diag).await;
    assert_eq!(rx.recv().await, Some(103));

    assert!(service.off(id));
    for c in &chains {
        c.push_log(purchase_log(106, 0, 9));
        c.set_head(106);
    }
    next_advance(&mut diag).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
    service.stop().await;
}

#[tokio::test]
async fn get_receipt_works_without_starting() {
    let hash = tx_hash(0x42);
    let chains = vec![MockChain::new("p1", 1), MockChain::new("p2", 1), MockChain::new("p3", 1)];
    for c in &chains {
        c.put_receipt(&hash, receipt_json(&hash, 0x42));
    }
    let service = service(&chains);
    let receipt = service.get_receipt(&hash).await.unwrap();
    assert_eq!(receipt.block_number, 0x42);
}

#[test]
fn builder_validation() {
    let chains = vec![MockChain::new("p1", 1), MockChain::new("p2", 1)];
    let no_contracts = EventServiceBuilder::new().transport(chains[0].endpoint(), chains[0].transport());
    assert!(matches!(no_contracts.build(), Err(ConfigError::Invalid(_))));

    let bad_quorum = EventServiceBuilder::new()
        .transport(chains[0].endpoint(), chains[0].transport())
        .transport(chains[1].endpoint(), chains[1].transport())
        .contract(market())
        .quorum(3);
    assert!(matches!(bad_quorum.build(), Err(ConfigError::Invalid(_))));

    let duplicate = EventServiceBuilder::new()
        .transport(chains[0].endpoint(), chains[0].transport())
        .transport(chains[0].endpoint(), chains[0].transport())
        .contract(market());
    assert!(matches!(duplicate.build(), Err(ConfigError::Registry(_))));

    let no_providers = EventServiceBuilder::new().contract(market());
    assert!(matches!(no_providers.build(), Err(ConfigError::Registry(_))));
}
