mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Namespace, PATIENCE, RecordingControl, spawn_request, wait_for};
use ft_coordinator::{FtClient, HeartbeatChannel, Server, SlotKey};

#[test]
fn replica_takes_over_and_restarted_primary_reclaims_the_slot() {
    let ns = Namespace::new("scenario");
    let control = Arc::new(RecordingControl::default());
    let server = Server::new(ns.config())
        .unwrap()
        .with_process_control(control.clone())
        .launch()
        .unwrap();
    let client = Arc::new(FtClient::connect(ns.config()).unwrap());

    // main_0 is admitted and starts beating.
    let main = client
        .request(1001, 9001, "main", 0)
        .unwrap()
        .into_emitter()
        .expect("first primary must be admitted");
    assert!(
        wait_for(PATIENCE, || server.heartbeat(0).unwrap() > 0),
        "admitted primary must heartbeat"
    );
    let snapshot = server.snapshot();
    let entry = snapshot.running(SlotKey::primary(0)).expect("main_0 running");
    assert!(entry.executed);
    assert_eq!(entry.name, "main_9001");

    // replica_0 parks in the sleeping set.
    let replica = spawn_request(&client, 1002, 9002, "replica", 0);
    assert!(
        wait_for(PATIENCE, || server
            .snapshot()
            .sleeping(SlotKey::replica(0))
            .is_some()),
        "replica must be parked"
    );
    assert!(!replica.is_finished(), "parked replica must still be waiting");

    // The primary goes silent: the replica is woken and recorded as executor.
    main.stop();
    let replica_emitter = replica
        .join()
        .unwrap()
        .unwrap()
        .into_emitter()
        .expect("replica must be promoted");
    assert!(
        wait_for(PATIENCE, || {
            let s = server.snapshot();
            s.running(SlotKey::primary(0)).is_none()
                && s.running(SlotKey::replica(0)).is_some_and(|e| e.executed)
        }),
        "failover must remove the dead primary and record the replica"
    );
    assert!(control.killed().is_empty());

    // A restarted primary takes the slot back and the replica is signalled.
    let fresh = client
        .request(1003, 9003, "main", 0)
        .unwrap()
        .into_emitter()
        .expect("restarted primary must be admitted");
    assert_eq!(control.killed(), vec![1002]);

    let snapshot = server.snapshot();
    assert!(snapshot.running(SlotKey::replica(0)).is_none());
    let entry = snapshot.running(SlotKey::primary(0)).expect("main_0 running");
    assert_eq!(entry.name, "main_9003");
    assert!(entry.executed);

    replica_emitter.stop();
    fresh.stop();
    assert_eq!(server.shutdown(), 0);
}

#[test]
fn counter_stuck_at_zero_never_fails_over() {
    let ns = Namespace::new("silent");
    let server = Server::new(ns.config()).unwrap().launch().unwrap();
    let client = Arc::new(FtClient::connect(ns.config()).unwrap());

    let replica = spawn_request(&client, 2001, 9101, "replica", 1);
    assert!(wait_for(PATIENCE, || server
        .snapshot()
        .sleeping(SlotKey::replica(1))
        .is_some()));

    // Far beyond the staleness threshold of 20 one-millisecond ticks.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(server.heartbeat(1).unwrap(), 0);
    assert!(server.snapshot().sleeping(SlotKey::replica(1)).is_some());
    assert!(!replica.is_finished());

    assert_eq!(server.shutdown(), 1, "the parked replica is rejected on shutdown");
    let admission = replica.join().unwrap().unwrap();
    assert!(!admission.is_admitted());
}

#[test]
fn slots_fail_over_independently() {
    let ns = Namespace::new("slots");
    let server = Server::new(ns.config()).unwrap().launch().unwrap();
    let client = Arc::new(FtClient::connect(ns.config()).unwrap());

    let steady = client.request(3001, 9201, "main", 0).unwrap().into_emitter().unwrap();
    let failing = client.request(3002, 9202, "main", 1).unwrap().into_emitter().unwrap();
    let replica_0 = spawn_request(&client, 3003, 9203, "replica", 0);
    let replica_1 = spawn_request(&client, 3004, 9204, "replica", 1);
    assert!(wait_for(PATIENCE, || {
        let s = server.snapshot();
        s.sleeping.len() == 2 && server.heartbeat(1).unwrap() > 0
    }));

    failing.stop();
    let promoted = replica_1.join().unwrap().unwrap().into_emitter().unwrap();

    // Slot 0 keeps its primary and its parked replica.
    std::thread::sleep(Duration::from_millis(50));
    let snapshot = server.snapshot();
    assert!(snapshot.running(SlotKey::primary(0)).is_some());
    assert!(snapshot.sleeping(SlotKey::replica(0)).is_some());
    assert!(!replica_0.is_finished());

    // Stop the server first so slot 0 cannot fail over once its primary stops.
    drop(server);
    assert!(!replica_0.join().unwrap().unwrap().is_admitted());
    steady.stop();
    promoted.stop();
}

#[test]
fn primary_frozen_at_zero_after_a_wrap_still_fails_over() {
    let ns = Namespace::new("wrapzero");
    let config = ns.config();
    assert_eq!(config.heartbeat_wrap, 100);
    let server = Server::new(config.clone()).unwrap().launch().unwrap();
    let client = Arc::new(FtClient::connect(config.clone()).unwrap());
    let channel = HeartbeatChannel::open(&config).unwrap();

    let main = client.request(8001, 9901, "main", 1).unwrap().into_emitter().unwrap();
    // Let the counter run through at least one full wrap.
    std::thread::sleep(Duration::from_millis(30));
    let replica = spawn_request(&client, 8002, 9902, "replica", 1);
    assert!(wait_for(PATIENCE, || server
        .snapshot()
        .sleeping(SlotKey::replica(1))
        .is_some()));

    // The primary dies right after its emitter wrapped the counter to zero.
    main.stop();
    channel.claim(1).unwrap();
    assert_eq!(server.heartbeat(1).unwrap(), 0);

    let promoted = replica
        .join()
        .unwrap()
        .unwrap()
        .into_emitter()
        .expect("a freeze at zero after moving is a death");
    assert!(wait_for(PATIENCE, || server
        .snapshot()
        .running(SlotKey::replica(1))
        .is_some_and(|e| e.executed)));

    promoted.stop();
    drop(server);
}
