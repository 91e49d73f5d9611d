//! Integration tests for the service controller

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use blobroute::cluster::SERVICE_NAME_PROXY;
use blobroute::{Error, ServiceConfig, ServiceController};

use common::{init_tracing, node, wait_until, MockClusterManager};

fn config() -> ServiceConfig {
    ServiceConfig {
        cluster_id: 1,
        idc: "z0".into(),
        reload_secs: 3600,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_punishment_gates_selection() {
    init_tracing();
    let cm = Arc::new(
        MockClusterManager::new()
            .with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0"), node("host-b", "z0")]),
    );
    let sc = ServiceController::new(config(), cm).await.unwrap();

    sc.punish_service(SERVICE_NAME_PROXY, "host-a", 60);
    for _ in 0..100 {
        assert_eq!(sc.get_service_host(SERVICE_NAME_PROXY).unwrap(), "host-b");
    }
}

#[tokio::test]
async fn test_refresh_restores_punished_hosts() {
    let cm = Arc::new(
        MockClusterManager::new()
            .with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0"), node("host-b", "z0")]),
    );
    let sc = ServiceController::new(
        ServiceConfig {
            reload_secs: 1,
            ..config()
        },
        cm,
    )
    .await
    .unwrap();

    sc.punish_service(SERVICE_NAME_PROXY, "host-a", 600);
    assert_eq!(
        sc.get_service_hosts(SERVICE_NAME_PROXY).unwrap(),
        vec!["host-b".to_string()]
    );

    // the reload publishes fresh entries, clearing the punish state
    wait_until(|| {
        sc.get_service_hosts(SERVICE_NAME_PROXY)
            .map(|hosts| hosts.len() == 2)
            .unwrap_or(false)
    })
    .await;
    sc.close();
}

#[tokio::test]
async fn test_refresh_picks_up_new_membership() {
    let cm = Arc::new(
        MockClusterManager::new().with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0")]),
    );
    let sc = ServiceController::new(
        ServiceConfig {
            reload_secs: 1,
            ..config()
        },
        cm.clone(),
    )
    .await
    .unwrap();

    cm.set_service(
        SERVICE_NAME_PROXY,
        vec![node("host-a", "z0"), node("host-c", "z0")],
    );
    wait_until(|| {
        sc.get_service_hosts(SERVICE_NAME_PROXY)
            .map(|hosts| hosts.contains(&"host-c".to_string()))
            .unwrap_or(false)
    })
    .await;
    sc.close();
}

#[tokio::test]
async fn test_all_hosts_returned_shuffled() {
    let cm = Arc::new(MockClusterManager::new().with_service(
        SERVICE_NAME_PROXY,
        vec![
            node("host-a", "z0"),
            node("host-b", "z0"),
            node("host-c", "z0"),
        ],
    ));
    let sc = ServiceController::new(config(), cm).await.unwrap();

    let hosts: HashSet<String> = sc
        .get_service_hosts(SERVICE_NAME_PROXY)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(hosts.len(), 3);
}

#[tokio::test]
async fn test_no_healthy_host_when_all_punished() {
    let cm = Arc::new(
        MockClusterManager::new()
            .with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0"), node("host-b", "z0")]),
    );
    let sc = ServiceController::new(config(), cm).await.unwrap();

    sc.punish_service(SERVICE_NAME_PROXY, "host-a", 60);
    sc.punish_service(SERVICE_NAME_PROXY, "host-b", 60);

    assert_eq!(
        sc.get_service_hosts(SERVICE_NAME_PROXY).unwrap_err(),
        Error::NoHealthyHost(SERVICE_NAME_PROXY.into())
    );
    assert_eq!(
        sc.get_service_host(SERVICE_NAME_PROXY).unwrap_err(),
        Error::NoHealthyHost(SERVICE_NAME_PROXY.into())
    );
}

#[tokio::test]
async fn test_single_flight_disk_resolution() {
    init_tracing();
    let cm = Arc::new(
        MockClusterManager::new()
            .with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0")])
            .with_disk(7, "10.0.0.7:8889", "z0")
            .with_disk_delay(Duration::from_millis(200)),
    );
    let sc = Arc::new(ServiceController::new(config(), cm.clone()).await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..50 {
        let sc = sc.clone();
        handles.push(tokio::spawn(async move { sc.get_disk_host(7).await }));
    }
    for handle in handles {
        let resolved = handle.await.unwrap().unwrap();
        assert_eq!(resolved.host, "10.0.0.7:8889");
        assert_eq!(resolved.idc, "z0");
        assert!(!resolved.punished);
    }

    assert_eq!(
        cm.disk_info_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // later callers hit the memoized entry, not the cluster manager
    sc.get_disk_host(7).await.unwrap();
    assert_eq!(
        cm.disk_info_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_disk_punishment_with_threshold() {
    let cm = Arc::new(
        MockClusterManager::new()
            .with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0")])
            .with_disk(3, "10.0.0.3:8889", "z0"),
    );
    let sc = ServiceController::new(config(), cm).await.unwrap();

    assert!(!sc.get_disk_host(3).await.unwrap().punished);

    sc.punish_disk_with_threshold(3, 60);
    sc.punish_disk_with_threshold(3, 60);
    assert!(!sc.get_disk_host(3).await.unwrap().punished);

    sc.punish_disk_with_threshold(3, 60);
    assert!(sc.get_disk_host(3).await.unwrap().punished);
}

#[tokio::test]
async fn test_threshold_streak_expires() {
    let cm = Arc::new(
        MockClusterManager::new()
            .with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0")])
            .with_disk(5, "10.0.0.5:8889", "z0"),
    );
    let sc = ServiceController::new(
        ServiceConfig {
            punish_valid_interval_secs: 1,
            ..config()
        },
        cm,
    )
    .await
    .unwrap();
    sc.get_disk_host(5).await.unwrap();

    sc.punish_disk_with_threshold(5, 60);
    sc.punish_disk_with_threshold(5, 60);
    // second-granularity timestamps: oversleep the 1s window well past it
    tokio::time::sleep(Duration::from_millis(2200)).await;

    // the streak lapsed: this failure restarts the count instead of punishing
    sc.punish_disk_with_threshold(5, 60);
    assert!(!sc.get_disk_host(5).await.unwrap().punished);

    sc.punish_disk_with_threshold(5, 60);
    sc.punish_disk_with_threshold(5, 60);
    sc.punish_disk_with_threshold(5, 60);
    assert!(sc.get_disk_host(5).await.unwrap().punished);
}

#[tokio::test]
async fn test_close_stops_refresh() {
    let cm = Arc::new(
        MockClusterManager::new().with_service(SERVICE_NAME_PROXY, vec![node("host-a", "z0")]),
    );
    let sc = ServiceController::new(
        ServiceConfig {
            reload_secs: 1,
            ..config()
        },
        cm.clone(),
    )
    .await
    .unwrap();

    sc.close();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    cm.set_service(SERVICE_NAME_PROXY, vec![node("host-z", "z0")]);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(
        sc.get_service_hosts(SERVICE_NAME_PROXY).unwrap(),
        vec!["host-a".to_string()]
    );
}
