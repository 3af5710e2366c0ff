//! Property tests for subscription replay
//!
//! Whatever set of subscriptions is registered before a connection loss,
//! the reconnect re-issues exactly those topics with their stored QoS.


use mqttlink::testing::MockConnector;
use mqttlink::{ConnectionManager, QoS, StatusKind, TransportEvent};
use proptest::prelude::*;
use std::collections::BTreeMap;
use test_helpers::{connect_recording, next_status, statuses_until, test_config};

fn qos_strategy() -> impl Strategy<Value = QoS> {
    prop_oneof![
        Just(QoS::AtMostOnce),
        Just(QoS::AtLeastOnce),
        Just(QoS::ExactlyOnce),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_replay_matches_registry(
        subscriptions in prop::collection::vec(("[a-c]{1,2}/[x-z]", qos_strategy()), 0..8),
        clean_session in any::<bool>(),
    ) {
        paused_runtime().block_on(async {
            // Arrange: connected, with the generated subscriptions registered
            let connector = MockConnector::new();
            let mut config = test_config();
            config.clean_session = clean_session;
            let manager = ConnectionManager::new(config, connector.clone()).unwrap();
            let mut log = connect_recording(&manager).await;
            assert_eq!(next_status(&mut log).await, StatusKind::ConnectSuccess);

            let mut expected = BTreeMap::new();
            for (topic, qos) in &subscriptions {
                manager.subscribe(topic, *qos, |_, _| {}).await.unwrap();
                expected.insert(topic.clone(), *qos);
            }
            connector.clear_history();

            // Act: drop the connection and let the retry succeed
            connector.emit(TransportEvent::Closed("connection reset".to_string()));
            statuses_until(&mut log, StatusKind::ConnectSuccess).await;

            // Assert: one replay per registry entry, with the stored QoS
            let mut replayed = connector.subscribe_calls();
            replayed.sort();
            let expected: Vec<(String, QoS)> = expected.into_iter().collect();
            assert_eq!(replayed, expected);
            assert_eq!(
                manager.subscribed_topics().await,
                expected.iter().map(|(topic, _)| topic.clone()).collect::<Vec<_>>()
            );
        });
    }
}
