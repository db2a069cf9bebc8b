use std::sync::Arc;
use std::time::Duration;

use bitcoin::OutPoint;
use tokio::time::timeout;

use super::mock::{dummy_tx, spending_tx, MockChainBackend};
use crate::error::Error;
use crate::events::BlockDetails;
use crate::notifier::ChainNotifier;

const WAIT: Duration = Duration::from_secs(5);

async fn start_notifier(backend: Arc<MockChainBackend>) -> ChainNotifier {
    let mut notifier = ChainNotifier::new(backend);
    notifier.start().await.expect("notifier starts");
    notifier
}

#[tokio::test]
async fn epochs_preserve_connect_order_and_drop_gaps() {
    let backend = Arc::new(MockChainBackend::new(100));
    let notifier = start_notifier(backend.clone()).await;
    let mut epochs = notifier.register_block_epoch().await.unwrap();

    let h101 = backend.add_block(101, vec![]);
    let h102 = backend.add_block(102, vec![]);
    notifier.block_connected(h101, 101);
    // Height gap: must be dropped without advancing state.
    notifier.block_connected(h102, 105);
    notifier.block_connected(h102, 102);

    let first = timeout(WAIT, epochs.next()).await.unwrap().unwrap();
    assert_eq!((first.hash, first.height), (h101, 101));
    let second = timeout(WAIT, epochs.next()).await.unwrap().unwrap();
    assert_eq!((second.hash, second.height), (h102, 102));

    let (best_hash, best_height) = notifier.best_block().await.unwrap();
    assert_eq!((best_hash, best_height), (h102, 102));
}

#[tokio::test]
async fn confirmation_dispatch_and_reorg_replay() {
    let backend = Arc::new(MockChainBackend::new(99));
    let notifier = start_notifier(backend.clone()).await;
    let mut epochs = notifier.register_block_epoch().await.unwrap();

    let tx = dummy_tx(7);
    let txid = tx.compute_txid();
    let conf = notifier.register_confirmation(txid, 3, 99).await.unwrap();

    let h100 = backend.add_block(100, vec![tx]);
    let h101 = backend.add_block(101, vec![]);
    let h102 = backend.add_block(102, vec![]);
    notifier.block_connected(h100, 100);
    notifier.block_connected(h101, 101);
    notifier.block_connected(h102, 102);

    let details = timeout(WAIT, conf.wait()).await.unwrap().unwrap();
    assert_eq!(details.block_height, 100);
    assert_eq!(details.block_hash, h100);
    assert_eq!(details.tx_index, 0);

    // Reorg the confirming blocks away, then rebuild the same branch.
    notifier.block_disconnected(h102, 102);
    notifier.block_disconnected(h101, 101);
    notifier.block_disconnected(h100, 100);
    for _ in 0..3 {
        timeout(WAIT, epochs.next()).await.unwrap().unwrap();
    }

    // A fresh registration resolves historically and is re-delivered once
    // the branch reaches depth 3 again.
    let replay = notifier.register_confirmation(txid, 3, 99).await.unwrap();
    notifier.block_connected(h100, 100);
    notifier.block_connected(h101, 101);
    notifier.block_connected(h102, 102);
    let details = timeout(WAIT, replay.wait()).await.unwrap().unwrap();
    assert_eq!(details.block_height, 100);
}

#[tokio::test]
async fn spend_dispatched_to_every_client_once() {
    let backend = Arc::new(MockChainBackend::new(100));
    let outpoint = OutPoint::new(dummy_tx(1).compute_txid(), 0);
    backend.add_utxo(outpoint, 50_000);
    let notifier = start_notifier(backend.clone()).await;

    let first = notifier.register_spend(outpoint, 100).await.unwrap();
    let second = notifier.register_spend(outpoint, 100).await.unwrap();

    let spender = spending_tx(outpoint, 11);
    // A mempool-only sighting is ignored.
    notifier.redeeming_tx(spender.clone(), None);
    notifier.redeeming_tx(
        spender.clone(),
        Some(BlockDetails {
            hash: backend.add_block(101, vec![spender.clone()]),
            height: 101,
            tx_index: 0,
        }),
    );

    for event in [first, second] {
        let detail = timeout(WAIT, event.wait()).await.unwrap().unwrap();
        assert_eq!(detail.spent_outpoint, outpoint);
        assert_eq!(detail.spender_txid, spender.compute_txid());
        assert_eq!(detail.spender_input_index, 0);
        assert_eq!(detail.spending_height, 101);
    }
}

#[tokio::test]
async fn spend_detected_in_connected_block() {
    let backend = Arc::new(MockChainBackend::new(100));
    let outpoint = OutPoint::new(dummy_tx(2).compute_txid(), 0);
    backend.add_utxo(outpoint, 50_000);
    let notifier = start_notifier(backend.clone()).await;

    let event = notifier.register_spend(outpoint, 100).await.unwrap();
    let spender = spending_tx(outpoint, 21);
    let hash = backend.add_block(101, vec![spender.clone()]);
    notifier.block_connected(hash, 101);

    let detail = timeout(WAIT, event.wait()).await.unwrap().unwrap();
    assert_eq!(detail.spender_txid, spender.compute_txid());
    assert_eq!(detail.spending_height, 101);
}

#[tokio::test]
async fn historical_spend_replayed_through_rescan() {
    let backend = Arc::new(MockChainBackend::new(100));
    let creating = dummy_tx(3);
    let outpoint = OutPoint::new(creating.compute_txid(), 0);
    backend.add_block(95, vec![creating]);

    let spender = spending_tx(outpoint, 31);
    backend.stage_rescan_spend(
        outpoint,
        crate::events::TxUpdate {
            tx: spender.clone(),
            block: Some(BlockDetails {
                hash: backend.add_block(97, vec![spender.clone()]),
                height: 97,
                tx_index: 0,
            }),
        },
    );

    let notifier = start_notifier(backend.clone()).await;
    // The outpoint is not in the UTXO set, forcing the historical path.
    let event = notifier.register_spend(outpoint, 90).await.unwrap();
    let detail = timeout(WAIT, event.wait()).await.unwrap().unwrap();
    assert_eq!(detail.spender_txid, spender.compute_txid());
    assert_eq!(detail.spending_height, 97);
}

#[tokio::test]
async fn cancel_is_idempotent_and_closes_channel() {
    let backend = Arc::new(MockChainBackend::new(100));
    let outpoint = OutPoint::new(dummy_tx(4).compute_txid(), 0);
    backend.add_utxo(outpoint, 10_000);
    let notifier = start_notifier(backend.clone()).await;

    let event = notifier.register_spend(outpoint, 100).await.unwrap();
    event.cancel();
    event.cancel();
    assert!(timeout(WAIT, event.wait()).await.unwrap().is_none());
}

#[tokio::test]
async fn shutdown_closes_subscribers_and_rejects_new_registrations() {
    let backend = Arc::new(MockChainBackend::new(100));
    let notifier = start_notifier(backend.clone()).await;

    let conf = notifier
        .register_confirmation(dummy_tx(5).compute_txid(), 2, 100)
        .await
        .unwrap();
    let mut epochs = notifier.register_block_epoch().await.unwrap();

    notifier.stop();
    assert!(timeout(WAIT, conf.wait()).await.unwrap().is_none());
    assert!(timeout(WAIT, epochs.next()).await.unwrap().is_none());

    let err = notifier
        .register_confirmation(dummy_tx(6).compute_txid(), 1, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}
