//! Breadth-first discovery over in-memory liquidity managers.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use ethers::types::U256;
use liquidity_rebalancer::discoverer::{BfsDiscoverer, Discoverer, DiscovererFactory};
use liquidity_rebalancer::liquidity_manager::{FactoryError, NetworkType};
use liquidity_rebalancer::models::Edge;

/// 1 -> 2 -> 3 -> 1, one direction only.
fn triangle() -> std::sync::Arc<FakeFactory> {
    let factory = std::sync::Arc::new(FakeFactory::new());
    factory.insert(1, FakeLiquidityManager::new(100).with_peer(2));
    factory.insert(2, FakeLiquidityManager::new(200).with_peer(3));
    factory.insert(3, FakeLiquidityManager::new(300).with_peer(1));
    factory
}

#[tokio::test]
async fn cycle_is_walked_once_from_any_root() {
    for root in [1u64, 2, 3] {
        let factory = triangle();
        let discoverer = BfsDiscoverer::new(net(root), manager_addr(root), factory.clone());

        let graph = discoverer.discover().await.unwrap();

        assert_eq!(graph.networks(), vec![net(1), net(2), net(3)]);
        assert_eq!(
            graph.get_edges(),
            vec![
                Edge::new(net(1), net(2)),
                Edge::new(net(2), net(3)),
                Edge::new(net(3), net(1)),
            ]
        );
        for n in [1u64, 2, 3] {
            assert_eq!(
                factory.get(n).balance_calls.load(Ordering::SeqCst),
                1,
                "network {} visited more than once from root {}",
                n,
                root
            );
        }
    }
}

#[tokio::test]
async fn vertex_data_is_populated() {
    let factory = triangle();
    let graph = BfsDiscoverer::new(net(1), manager_addr(1), factory)
        .discover()
        .await
        .unwrap();

    let data = graph.get_data(net(2)).unwrap();
    assert_eq!(data.liquidity, Some(U256::from(200)));
    assert_eq!(data.rebalancer_address, manager_addr(2));
    assert_eq!(data.token_address, addr(0xee));
    assert_eq!(data.network_selector, net(2));
    assert_eq!(
        graph
            .get_xchain_rebalancer_data(net(2))
            .unwrap()
            .get(&net(3))
            .map(|d| d.remote_rebalancer_address),
        Some(manager_addr(3))
    );
}

#[tokio::test]
async fn bidirectional_mesh_has_both_directions() {
    let factory = mesh(&[(1, 10), (2, 20)]);
    let graph = BfsDiscoverer::new(net(2), manager_addr(2), factory)
        .discover()
        .await
        .unwrap();

    assert!(graph.has_connection(net(1), net(2)));
    assert!(graph.has_connection(net(2), net(1)));
    assert_eq!(graph.get_edges().len(), 2);
}

#[tokio::test]
async fn failed_read_aborts_discovery() {
    let factory = triangle();
    factory.get(3).fail_balance.store(true, Ordering::SeqCst);

    let err = BfsDiscoverer::new(net(1), manager_addr(1), factory)
        .discover()
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("get balance"));
}

#[tokio::test]
async fn unreachable_peer_manager_aborts_discovery() {
    let factory = std::sync::Arc::new(FakeFactory::new());
    factory.insert(1, FakeLiquidityManager::new(1).with_peer(9));

    let err = BfsDiscoverer::new(net(1), manager_addr(1), factory)
        .discover()
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("liquidity manager (9"));
}

#[tokio::test]
async fn factory_dispatches_on_root_network_type() {
    let factory = triangle();
    let discoverers = discoverer_factory(factory.clone(), &[1, 2, 3]);

    let graph = discoverers
        .new_discoverer(net(1), manager_addr(1))
        .unwrap()
        .discover()
        .await
        .unwrap();
    assert_eq!(graph.len(), 3);

    let err = discoverers
        .new_discoverer(net(42), manager_addr(42))
        .err()
        .unwrap();
    assert_eq!(
        err.downcast_ref::<FactoryError>(),
        Some(&FactoryError::UnknownNetwork(net(42)))
    );

    let solana = liquidity_rebalancer::discoverer::BaseDiscovererFactory::new(
        [(net(5), NetworkType::Solana)].into_iter().collect(),
        factory,
    );
    let err = solana.new_discoverer(net(5), addr(5)).err().unwrap();
    assert_eq!(
        err.downcast_ref::<FactoryError>(),
        Some(&FactoryError::UnsupportedNetworkType {
            network_type: NetworkType::Solana,
            network: net(5),
        })
    );
}
