//! End-to-end resolution and failover against loopback mock servers

mod support;

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use support::{
    bulk, collect_until_end, data_node, dead_port, master_addr, replica_entry, sentinel_entry,
    sentinel_for, sentinel_with, wait_for_event,
};
use valkey_sentinel_client::{
    AuthConfig, ClientError, ClientEvent, ConnectionState, PreferredReplica, PreferredReplicas,
    ReplicaRecord, RespValue, Role, SentinelClient, SentinelEndpoint, SentinelOptions,
    ServerAddress,
};

fn local(port: u16) -> SentinelEndpoint {
    SentinelEndpoint::new("127.0.0.1", port)
}

fn options(sentinel_ports: &[u16]) -> SentinelOptions {
    SentinelOptions::new(sentinel_ports.iter().map(|&p| local(p)).collect(), "mymaster")
        .with_connect_timeout(Duration::from_secs(1))
}

fn unreachable_message(err: &ClientError) -> bool {
    err.to_string().contains("are unreachable")
}

#[tokio::test]
async fn test_connects_to_reported_master() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;

    let client = SentinelClient::new(options(&[sentinel.port()])).unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(
        client.current_address(),
        Some(ServerAddress::new("127.0.0.1", master.port()))
    );
    assert_eq!(client.get("foo").await.unwrap(), bulk("bar"));
    assert!(master
        .commands()
        .iter()
        .any(|c| c == &["INFO".to_string(), "replication".to_string()]));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_tries_next_sentinel_when_first_unreachable() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;
    let dead = dead_port().await;

    let client = SentinelClient::new(options(&[dead, sentinel.port()])).unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.current_address().unwrap().port, master.port());
    assert!(!sentinel.commands().is_empty());
}

#[tokio::test]
async fn test_retry_disabled_fails_connect_and_queued_commands() {
    let first = dead_port().await;
    let second = dead_port().await;

    let client = SentinelClient::new(options(&[first, second]).with_lazy_connect(true)).unwrap();
    let mut events = client.subscribe();

    let (connected, queued) = tokio::join!(client.connect(), client.get("foo"));
    assert!(unreachable_message(&connected.unwrap_err()));
    assert!(unreachable_message(&queued.unwrap_err()));

    let seen = collect_until_end(&mut events).await;
    assert_eq!(seen.last(), Some(&ClientEvent::End));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ClientEvent::Error(err) if unreachable_message(err))));
    assert_eq!(client.state(), ConnectionState::Failed);

    // Later requests see the same terminal error
    assert!(unreachable_message(&client.ping().await.unwrap_err()));
}

#[tokio::test]
async fn test_retry_strategy_receives_increasing_attempts() {
    let dead = dead_port().await;
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&attempts);

    let opts = options(&[dead]).with_retry_strategy(move |attempt: u32| {
        recorder.lock().push(attempt);
        if attempt < 3 {
            Some(Duration::ZERO)
        } else {
            None
        }
    });
    let client = SentinelClient::new(opts).unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(unreachable_message(&err));
    assert_eq!(*attempts.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_sentinel_error_reply_kept_verbatim() {
    let sentinel = sentinel_with(|_| RespValue::Error("just rejected".to_string())).await;

    let client =
        SentinelClient::new(options(&[sentinel.port()]).with_lazy_connect(true)).unwrap();
    let err = client.connect().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "All sentinels are unreachable and retry is disabled. Last error: just rejected"
    );
}

#[tokio::test]
async fn test_null_answer_keeps_earlier_sentinel_error() {
    let rejecting = sentinel_with(|_| RespValue::Error("just rejected".to_string())).await;
    let silent = sentinel_with(|_| RespValue::Null).await;

    let client = SentinelClient::new(
        options(&[rejecting.port(), silent.port()]).with_lazy_connect(true),
    )
    .unwrap();
    let err = client.connect().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "All sentinels are unreachable and retry is disabled. Last error: just rejected"
    );
    assert!(!silent.commands().is_empty());
}

#[tokio::test]
async fn test_null_answer_moves_to_next_sentinel() {
    let master = data_node("master").await;
    let silent = sentinel_with(|sub| match sub {
        "sentinels" => RespValue::Array(Vec::new()),
        _ => RespValue::Null,
    })
    .await;
    let sentinel = sentinel_for(master.port()).await;

    let client = SentinelClient::new(options(&[silent.port(), sentinel.port()])).unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.current_address().unwrap().port, master.port());
}

#[tokio::test]
async fn test_wrong_role_moves_to_next_sentinel() {
    let stale = data_node("slave").await;
    let master = data_node("master").await;
    let first = sentinel_for(stale.port()).await;
    let second = sentinel_for(master.port()).await;

    let client = SentinelClient::new(options(&[first.port(), second.port()])).unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.current_address().unwrap().port, master.port());
    assert!(stale.commands().iter().all(|c| c[0] != "GET"));
}

#[tokio::test]
async fn test_update_sentinels_grows_known_set() {
    let master = data_node("master").await;
    let master_port = master.port();
    let peer_a = dead_port().await;
    let peer_b = dead_port().await;
    let own_port = Arc::new(AtomicU16::new(0));
    let own = Arc::clone(&own_port);

    let sentinel = sentinel_with(move |sub| match sub {
        "get-master-addr-by-name" => master_addr("127.0.0.1", master_port),
        "sentinels" => RespValue::Array(vec![
            sentinel_entry(own.load(Ordering::SeqCst)),
            sentinel_entry(peer_a),
            sentinel_entry(peer_b),
            sentinel_entry(peer_a),
        ]),
        _ => RespValue::Null,
    })
    .await;
    own_port.store(sentinel.port(), Ordering::SeqCst);

    let client = SentinelClient::new(options(&[sentinel.port()]).with_lazy_connect(true)).unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();

    let expected = vec![local(sentinel.port()), local(peer_a), local(peer_b)];
    assert_eq!(client.sentinels(), expected);
    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::SentinelsUpdated(_))).await;
    assert_eq!(event, ClientEvent::SentinelsUpdated(expected));
}

#[tokio::test]
async fn test_update_sentinels_disabled_keeps_seeds() {
    let master = data_node("master").await;
    let peer = dead_port().await;
    let master_port = master.port();

    let sentinel = sentinel_with(move |sub| match sub {
        "get-master-addr-by-name" => master_addr("127.0.0.1", master_port),
        "sentinels" => RespValue::Array(vec![sentinel_entry(peer)]),
        _ => RespValue::Null,
    })
    .await;

    let client = SentinelClient::new(
        options(&[sentinel.port()]).with_update_sentinels(false),
    )
    .unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.sentinels(), vec![local(sentinel.port())]);
    assert!(sentinel
        .commands()
        .iter()
        .all(|c| c.get(1).map(String::as_str) != Some("sentinels")));
}

#[tokio::test]
async fn test_sentinel_auth_sent_before_discovery() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;

    let opts = options(&[sentinel.port()])
        .with_sentinel_auth(AuthConfig::new("sentinelpass").with_username("watcher"));
    let client = SentinelClient::new(opts).unwrap();
    client.connect().await.unwrap();

    let commands = sentinel.commands();
    assert_eq!(commands[0], vec!["AUTH", "watcher", "sentinelpass"]);
    assert_eq!(commands[1][0], "SENTINEL");
    // Sentinel credentials never reach the data node
    assert!(master.commands().iter().all(|c| c[0] != "AUTH"));
}

#[tokio::test]
async fn test_node_auth_sent_before_role_check() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;

    let opts = options(&[sentinel.port()]).with_node_auth(AuthConfig::new("nodepass"));
    let client = SentinelClient::new(opts).unwrap();
    client.connect().await.unwrap();

    let commands = master.commands();
    assert_eq!(commands[0], vec!["AUTH", "nodepass"]);
    assert_eq!(commands[1], vec!["INFO", "replication"]);
}

#[tokio::test]
async fn test_preferred_replica_priority() {
    let replica = data_node("slave").await;
    let other = dead_port().await;
    let down = dead_port().await;
    let replica_port = replica.port();

    let sentinel = sentinel_with(move |sub| match sub {
        "slaves" => RespValue::Array(vec![
            replica_entry(other, "slave"),
            replica_entry(replica_port, "slave"),
            replica_entry(down, "slave,s_down"),
        ]),
        "sentinels" => RespValue::Array(Vec::new()),
        _ => RespValue::Null,
    })
    .await;

    let prefs = PreferredReplicas::Priority(vec![
        PreferredReplica::new("127.0.0.1", other, Some(100)),
        PreferredReplica::new("127.0.0.1", replica_port, Some(1)),
        PreferredReplica::new("127.0.0.1", replica_port, None),
    ]);
    let opts = options(&[sentinel.port()])
        .with_role(Role::Replica)
        .with_preferred_replicas(prefs);
    let client = SentinelClient::new(opts).unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.current_address().unwrap().port, replica_port);
}

#[tokio::test]
async fn test_replica_selector_function() {
    let first = data_node("slave").await;
    let second = data_node("slave").await;
    let (p1, p2) = (first.port(), second.port());

    let sentinel = sentinel_with(move |sub| match sub {
        "slaves" => RespValue::Array(vec![replica_entry(p1, "slave"), replica_entry(p2, "slave")]),
        "sentinels" => RespValue::Array(Vec::new()),
        _ => RespValue::Null,
    })
    .await;

    let opts = options(&[sentinel.port()])
        .with_role(Role::Replica)
        .with_preferred_replicas(PreferredReplicas::selector(
            move |candidates: &[ReplicaRecord]| candidates.iter().find(|r| r.port == p2).cloned(),
        ));
    let client = SentinelClient::new(opts).unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.current_address().unwrap().port, p2);
}

#[tokio::test]
async fn test_empty_replica_list_moves_to_next_sentinel() {
    let replica = data_node("slave").await;
    let replica_port = replica.port();

    let empty = sentinel_with(|_| RespValue::Array(Vec::new())).await;
    let sentinel = sentinel_with(move |sub| match sub {
        "slaves" => RespValue::Array(vec![replica_entry(replica_port, "slave")]),
        _ => RespValue::Array(Vec::new()),
    })
    .await;

    let opts = options(&[empty.port(), sentinel.port()]).with_role(Role::Replica);
    let client = SentinelClient::new(opts).unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.current_address().unwrap().port, replica_port);
}

#[tokio::test]
async fn test_replica_with_wrong_role_moves_to_next_sentinel() {
    let promoted = data_node("master").await;
    let replica = data_node("slave").await;
    let promoted_port = promoted.port();
    let replica_port = replica.port();

    let first = sentinel_with(move |sub| match sub {
        "slaves" => RespValue::Array(vec![replica_entry(promoted_port, "slave")]),
        _ => RespValue::Array(Vec::new()),
    })
    .await;
    let second = sentinel_with(move |sub| match sub {
        "slaves" => RespValue::Array(vec![replica_entry(replica_port, "slave")]),
        _ => RespValue::Array(Vec::new()),
    })
    .await;

    let opts = options(&[first.port(), second.port()]).with_role(Role::Replica);
    let client = SentinelClient::new(opts).unwrap();
    client.connect().await.unwrap();

    assert_eq!(client.current_address().unwrap().port, replica_port);
    assert!(promoted
        .commands()
        .iter()
        .any(|c| c == &["INFO".to_string(), "replication".to_string()]));
}

#[tokio::test]
async fn test_nat_map_applied_to_reported_address() {
    let master = data_node("master").await;
    let sentinel = sentinel_with(|sub| match sub {
        "get-master-addr-by-name" => master_addr("10.255.0.1", 6379),
        _ => RespValue::Array(Vec::new()),
    })
    .await;

    let opts = options(&[sentinel.port()]).with_nat_mapping(
        ServerAddress::new("10.255.0.1", 6379),
        ServerAddress::new("127.0.0.1", master.port()),
    );
    let client = SentinelClient::new(opts).unwrap();
    client.connect().await.unwrap();

    assert_eq!(
        client.current_address(),
        Some(ServerAddress::new("127.0.0.1", master.port()))
    );
}

#[tokio::test]
async fn test_failover_delivers_command_to_new_master() {
    let old_master = data_node("master").await;
    let new_master = data_node("master").await;
    let reported = Arc::new(AtomicU16::new(old_master.port()));
    let answer = Arc::clone(&reported);

    let sentinel = sentinel_with(move |sub| match sub {
        "get-master-addr-by-name" => master_addr("127.0.0.1", answer.load(Ordering::SeqCst)),
        _ => RespValue::Array(Vec::new()),
    })
    .await;

    let opts = options(&[sentinel.port()])
        .with_retry_strategy(|_: u32| Some(Duration::from_millis(10)));
    let client = SentinelClient::new(opts).unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    assert_eq!(client.current_address().unwrap().port, old_master.port());

    // Sentinel switches over, then the old master goes away
    reported.store(new_master.port(), Ordering::SeqCst);
    old_master.shutdown();

    let reply = client.set("foo", "bar").await.unwrap();
    assert_eq!(reply, RespValue::SimpleString("OK".to_string()));
    assert!(new_master
        .commands()
        .iter()
        .any(|c| c == &["SET".to_string(), "foo".to_string(), "bar".to_string()]));
    assert_eq!(client.current_address().unwrap().port, new_master.port());

    wait_for_event(&mut events, |e| *e == ClientEvent::Reconnecting).await;
}

#[tokio::test]
async fn test_lost_replica_is_resolved_again() {
    let old_replica = data_node("slave").await;
    let new_replica = data_node("slave").await;
    let reported = Arc::new(AtomicU16::new(old_replica.port()));
    let answer = Arc::clone(&reported);

    let sentinel = sentinel_with(move |sub| match sub {
        "slaves" => RespValue::Array(vec![replica_entry(answer.load(Ordering::SeqCst), "slave")]),
        _ => RespValue::Array(Vec::new()),
    })
    .await;

    let opts = options(&[sentinel.port()])
        .with_role(Role::Replica)
        .with_retry_strategy(|_: u32| Some(Duration::from_millis(10)));
    let client = SentinelClient::new(opts).unwrap();
    let mut events = client.subscribe();
    client.connect().await.unwrap();
    assert_eq!(client.current_address().unwrap().port, old_replica.port());

    reported.store(new_replica.port(), Ordering::SeqCst);
    old_replica.shutdown();

    assert_eq!(client.get("foo").await.unwrap(), bulk("bar"));
    assert!(new_replica
        .commands()
        .iter()
        .any(|c| c == &["GET".to_string(), "foo".to_string()]));
    assert_eq!(client.current_address().unwrap().port, new_replica.port());

    wait_for_event(&mut events, |e| *e == ClientEvent::Reconnecting).await;
}

#[tokio::test]
async fn test_queued_commands_flushed_in_order() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;

    let client =
        SentinelClient::new(options(&[sentinel.port()]).with_lazy_connect(true)).unwrap();
    let (a, b, c) = tokio::join!(
        client.set("k1", "v1"),
        client.set("k2", "v2"),
        client.get("k1"),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(c.unwrap(), bulk("bar"));

    let data: Vec<Vec<String>> = master
        .commands()
        .into_iter()
        .filter(|c| c[0] != "INFO")
        .collect();
    assert_eq!(
        data,
        vec![
            vec!["SET", "k1", "v1"],
            vec!["SET", "k2", "v2"],
            vec!["GET", "k1"],
        ]
    );
}

#[tokio::test]
async fn test_lazy_client_waits_for_connect() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;

    let client =
        SentinelClient::new(options(&[sentinel.port()]).with_lazy_connect(true)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(sentinel.commands().is_empty());

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_during_retry_stops_cycles() {
    let dead = dead_port().await;
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&attempts);

    let opts = options(&[dead]).with_retry_strategy(move |_: u32| {
        *counter.lock() += 1;
        Some(Duration::from_millis(20))
    });
    let client = SentinelClient::new(opts).unwrap();
    let mut events = client.subscribe();

    tokio::time::timeout(Duration::from_secs(2), async {
        while *attempts.lock() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.ping().await })
    };
    tokio::task::yield_now().await;

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(pending.await.unwrap().unwrap_err(), ClientError::Closed);
    wait_for_event(&mut events, |e| *e == ClientEvent::End).await;

    let after_close = *attempts.lock();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*attempts.lock(), after_close);
    assert_eq!(client.ping().await.unwrap_err(), ClientError::Closed);
}

#[tokio::test]
async fn test_new_rejects_empty_sentinel_list() {
    let result = SentinelClient::new(SentinelOptions::new(Vec::new(), "mymaster"));
    assert!(matches!(result, Err(ClientError::Config(_))));
}

#[tokio::test]
async fn test_connection_drop_during_command_reissues_it() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;

    let client = SentinelClient::new(
        options(&[sentinel.port()]).with_retry_strategy(|_: u32| Some(Duration::from_millis(10))),
    )
    .unwrap();
    client.connect().await.unwrap();

    // Drop the connection on the first GET, answer normally afterwards
    let dropped = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&dropped);
    master.set_handler(move |args: &[String]| match args[0].as_str() {
        "GET" => {
            let mut already = flag.lock();
            if *already {
                Some(bulk("bar"))
            } else {
                *already = true;
                None
            }
        }
        "INFO" => Some(bulk("role:master\r\n")),
        _ => Some(RespValue::SimpleString("OK".to_string())),
    });

    assert_eq!(client.get("foo").await.unwrap(), bulk("bar"));
    let gets = master.commands().iter().filter(|c| c[0] == "GET").count();
    assert_eq!(gets, 2);
}

#[tokio::test]
async fn test_disconnect_aborts_command_awaiting_reply() {
    let master = data_node("master").await;
    let sentinel = sentinel_for(master.port()).await;

    let client = SentinelClient::new(options(&[sentinel.port()])).unwrap();
    client.connect().await.unwrap();
    master.go_silent();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.get("foo").await })
    };
    tokio::time::timeout(Duration::from_secs(2), async {
        while !master.commands().iter().any(|c| c[0] == "GET") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_millis(500), client.disconnect())
        .await
        .expect("disconnect waited for the node to reply");
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(pending.await.unwrap().unwrap_err(), ClientError::Closed);
}
