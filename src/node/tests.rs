use super::*;
use crate::config::{
    AggregatorConfig, ApplicationConfig, CollectorConfig, NodeConfig, SchedulerConfig,
};
use crate::protocol::{encode_block, DatpHeader, Message};
use std::net::Ipv4Addr;
use tokio::net::UdpSocket;

fn config_for(role: Role) -> Config {
    Config {
        node: Some(NodeConfig { role }),
        ..Config::default()
    }
}

fn local_collector() -> Config {
    let mut config = config_for(Role::Collector);
    config.collector = Some(CollectorConfig {
        aggregator_port: 0,
        probe_port: 0,
        bind_addr: Ipv4Addr::LOCALHOST,
    });
    config
}

fn local_aggregator() -> Config {
    let mut config = config_for(Role::Aggregator);
    config.aggregator = Some(AggregatorConfig {
        port: 0,
        bind_addr: Ipv4Addr::LOCALHOST,
        ..AggregatorConfig::default()
    });
    config
}

fn local_source(port: u16) -> Config {
    let mut app = ApplicationConfig::preset(1, Ipv4Addr::LOCALHOST).unwrap();
    app.port = port;
    let mut config = config_for(Role::Source);
    config.applications = vec![app];
    config
}

fn message(application: u8) -> Message {
    Message::new(
        DatpHeader::new()
            .with_application(application)
            .with_timestamp(unix_time_nanos())
            .with_data_length(4),
        vec![0; 4],
    )
}

fn unix_time_nanos() -> u64 {
    crate::transport::unix_time().as_nanos() as u64
}

// ===== Construction Tests =====

#[test]
fn test_new_node_per_role() {
    let node = Node::new(config_for(Role::Aggregator)).unwrap();
    assert_eq!(node.role(), Role::Aggregator);
    assert_eq!(node.state(), NodeState::Created);
    assert!(node.aggregator().is_some());
    assert!(node.collector().is_none());

    let node = Node::new(config_for(Role::Collector)).unwrap();
    assert_eq!(node.role(), Role::Collector);
    assert!(node.collector().is_some());

    let node = Node::new(local_source(9999)).unwrap();
    assert_eq!(node.role(), Role::Source);
    assert_eq!(node.applications().len(), 1);
    assert_eq!(node.transport_count(), 0);
}

#[test]
fn test_new_rejects_invalid_config() {
    let mut config = config_for(Role::Aggregator);
    config.aggregator = Some(AggregatorConfig {
        scheduler_on: false,
        function_on: true,
        ..AggregatorConfig::default()
    });
    assert!(matches!(
        Node::new(config),
        Err(NodeError::Config(ConfigError::FunctionWithoutScheduler))
    ));

    let mut config = config_for(Role::Aggregator);
    config.scheduler = Some(SchedulerConfig {
        maximum_hold_us: 100,
        minimum_hold_us: 200,
    });
    assert!(matches!(
        Node::new(config),
        Err(NodeError::Config(ConfigError::InvalidHoldTimes { .. }))
    ));

    assert!(matches!(
        Node::new(config_for(Role::Source)),
        Err(NodeError::Config(ConfigError::NoApplications(Role::Source)))
    ));
}

#[test]
fn test_node_state_transitions() {
    assert!(NodeState::Created.can_start());
    assert!(!NodeState::Running.can_start());
    assert!(!NodeState::Stopped.can_start());
    assert!(NodeState::Running.can_stop());
    assert!(NodeState::Running.is_operational());
    assert_eq!(NodeState::Stopping.to_string(), "stopping");
}

// ===== Lifecycle Tests =====

#[tokio::test]
async fn test_stop_before_start() {
    let mut node = Node::new(local_collector()).unwrap();
    assert!(matches!(node.stop().await, Err(NodeError::NotStarted)));
    assert!(matches!(
        node.run_rx_loop(std::future::ready(())).await,
        Err(NodeError::NotStarted)
    ));
}

#[tokio::test]
async fn test_collector_binds_two_transports() {
    let mut node = Node::new(local_collector()).unwrap();
    node.start().await.unwrap();

    assert!(node.is_running());
    assert_eq!(node.transport_count(), 2);
    assert!(node.data_addr().is_some());
    assert!(node.probe_addr().is_some());
    assert_ne!(node.data_addr(), node.probe_addr());
    assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

    node.stop().await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
    assert_eq!(node.transport_count(), 0);
    assert!(!node.collector().unwrap().is_running());
}

#[tokio::test]
async fn test_start_fails_on_taken_port() {
    let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = local_aggregator();
    if let Some(aggregator) = config.aggregator.as_mut() {
        aggregator.port = taken.local_addr().unwrap().port();
    }

    let mut node = Node::new(config).unwrap();
    assert!(matches!(
        node.start().await,
        Err(NodeError::Transport(TransportError::StartFailed(_)))
    ));
    assert_eq!(node.state(), NodeState::Stopped);
    assert_eq!(node.transport_count(), 0);
}

// ===== Traffic Tests =====

#[tokio::test]
async fn test_collector_counts_datagrams_and_probes() {
    let mut node = Node::new(local_collector()).unwrap();
    node.start().await.unwrap();
    let data_addr = node.data_addr().unwrap();
    let probe_addr = node.probe_addr().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let block = encode_block([&message(1), &message(2)]);
    client.send_to(&block, data_addr).await.unwrap();
    client.send_to(&[0u8; 12], probe_addr).await.unwrap();

    node.run_rx_loop(tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    let stats = node.collector().unwrap().stats();
    assert_eq!(stats.packets_received, 1);
    assert_eq!(stats.messages_received, 2);
    assert_eq!(stats.bytes_received, block.len() as u64);
    assert_eq!(stats.probes_received, 1);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_aggregator_buffers_and_sweeps() {
    let mut node = Node::new(local_aggregator()).unwrap();
    node.start().await.unwrap();
    let addr = node.data_addr().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let block = encode_block([&message(1), &message(2)]);
    client.send_to(&block, addr).await.unwrap();

    node.run_rx_loop(tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    let aggregator = node.aggregator().unwrap();
    let stats = aggregator.stats();
    assert_eq!(stats.packets_received, 1);
    assert_eq!(stats.messages_received, 2);
    // No route to a parent yet: the sweep could not be delivered.
    assert_eq!(stats.packets_sent, 0);
    assert_eq!(stats.packets_sent_failure, 1);
    assert_eq!(aggregator.scheduler_stats().unwrap().messages_total, 2);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_source_to_collector() {
    let mut collector = Node::new(local_collector()).unwrap();
    collector.start().await.unwrap();
    let port = collector.data_addr().unwrap().port();

    let mut source = Node::new(local_source(port)).unwrap();
    source.start().await.unwrap();
    assert_eq!(source.transport_count(), 1);

    let window = Duration::from_millis(350);
    let (collected, sent) = tokio::join!(
        collector.run_rx_loop(tokio::time::sleep(window)),
        source.run_rx_loop(tokio::time::sleep(window)),
    );
    collected.unwrap();
    sent.unwrap();

    let app_stats = source.applications()[0].stats();
    assert!(app_stats.messages_sent >= 3);
    assert_eq!(app_stats.send_failures, 0);

    let stats = collector.collector().unwrap().stats();
    assert!(stats.messages_received >= 1);
    assert!(stats.messages_received <= app_stats.messages_sent);
    assert_eq!(stats.messages_merged, 0);

    source.stop().await.unwrap();
    collector.stop().await.unwrap();
}
