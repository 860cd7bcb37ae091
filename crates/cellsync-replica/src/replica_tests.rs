use super::*;
use cellsync_protocols::{OutputFragment, RuntimeStatus};

fn replica() -> Replica {
    Replica::new(DocumentId::parse("doc").unwrap())
}

fn client_of(replica: &Replica) -> Doc {
    let doc = Doc::new();
    let update = Update::decode_v1(&replica.snapshot()).unwrap();
    doc.transact_mut().apply_update(update).unwrap();
    doc
}

fn changes_since(doc: &Doc, sv: &StateVector) -> Vec<u8> {
    doc.transact().encode_state_as_update_v1(sv)
}

#[test]
fn test_seed_default_content() {
    let replica = replica();
    replica.seed_default();
    let json = replica.to_json();
    assert_eq!(json[NODES]["welcome"]["type"], "CODE");
    assert_eq!(json[NODES]["ROOT"]["children"][0], "welcome");
    assert!(json[CODE].get("welcome").is_some());
}

#[test]
fn test_apply_update_publishes_with_origin() {
    let replica = replica();
    let mut updates = replica.subscribe();

    let client = client_of(&replica);
    let nodes = client.get_or_insert_map(NODES);
    let sv = client.transact().state_vector();
    nodes.insert(&mut client.transact_mut(), "n1", json_to_any(&serde_json::json!("node")));
    let update = changes_since(&client, &sv);

    let origin = UpdateOrigin::Connection(ConnectionId(7));
    replica.apply_update(origin, &update).unwrap();

    let published = updates.try_recv().unwrap();
    assert_eq!(published.origin, origin);
    assert_eq!(&*published.update, update.as_slice());
    assert_eq!(replica.to_json()[NODES]["n1"], "node");
}

#[test]
fn test_empty_update_is_not_published() {
    let replica = replica();
    let mut updates = replica.subscribe();
    replica
        .apply_update(UpdateOrigin::Connection(ConnectionId(1)), EMPTY_UPDATE)
        .unwrap();
    assert!(updates.try_recv().is_err());
}

#[test]
fn test_malformed_update_is_rejected() {
    let replica = replica();
    let mut updates = replica.subscribe();
    let result = replica.apply_update(UpdateOrigin::Local, &[0xff, 0xff, 0xff]);
    assert!(matches!(result, Err(ReplicaError::Decode(_))));
    assert!(updates.try_recv().is_err());
}

#[test]
fn test_mutate_publishes_local_update() {
    let replica = replica();
    let mut updates = replica.subscribe();
    replica.set_runtime(KernelKind::Python, &KernelRuntime::with_status(RuntimeStatus::Starting));

    let published = updates.try_recv().unwrap();
    assert_eq!(published.origin, UpdateOrigin::Local);

    // A client applying the published update sees the same runtime entry.
    let client = Doc::new();
    let runtime = client.get_or_insert_map(RUNTIME);
    client
        .transact_mut()
        .apply_update(Update::decode_v1(&replica.snapshot()).unwrap())
        .unwrap();
    let json = any_to_json(&runtime.to_json(&client.transact()));
    assert_eq!(json["python"]["status"], "starting");
}

#[test]
fn test_noop_mutation_is_not_published() {
    let replica = replica();
    let mut updates = replica.subscribe();
    assert!(!replica.clear_result("missing"));
    assert!(updates.try_recv().is_err());
}

#[test]
fn test_result_helpers() {
    let replica = replica();
    replica.set_result("req-1", &ExecutionResult::started());
    replica.update_result("req-1", |result| {
        result.push_stream("stdout", "7\n");
        result.finish(1_700_000_000_000, Some(3));
    });

    let result = replica.result("req-1").unwrap();
    assert!(!result.running);
    assert_eq!(result.exec_count, Some(3));
    assert_eq!(result.last_executed_at, Some(1_700_000_000_000));
    assert_eq!(
        result.outputs,
        vec![OutputFragment::Stream {
            name: "stdout".to_string(),
            text: "7\n".to_string()
        }]
    );

    assert!(replica.clear_result("req-1"));
    assert!(replica.result("req-1").is_none());
}

#[test]
fn test_entry_reads_only_their_key() {
    let replica = replica();
    replica.set_result("req-1", &ExecutionResult::started());
    replica.mutate(|txn, c| {
        c.results.insert(txn, "req-2", "not a result");
    });

    assert!(replica.result("req-1").unwrap().running);
    assert!(replica.result("req-2").is_none());
    assert!(replica.result("req-3").is_none());
}

#[test]
fn test_update_runtime_keeps_usage_fields() {
    let replica = replica();
    replica.update_runtime(KernelKind::Julia, |runtime| {
        runtime.cpu = Some("250m".to_string());
    });
    replica.update_runtime(KernelKind::Julia, |runtime| runtime.status = RuntimeStatus::Busy);

    let runtime = replica.runtime(KernelKind::Julia).unwrap();
    assert_eq!(runtime.status, RuntimeStatus::Busy);
    assert_eq!(runtime.cpu.as_deref(), Some("250m"));
    assert!(replica.clear_runtime(KernelKind::Julia));
    assert!(replica.runtime(KernelKind::Julia).is_none());
}

#[test]
fn test_encode_diff_contains_only_missing_changes() {
    let replica = replica();
    replica.seed_default();
    let client = client_of(&replica);
    let client_sv = client.transact().state_vector().encode_v1();

    replica.set_result("req-1", &ExecutionResult::started());
    let diff = replica.encode_diff(&client_sv).unwrap();
    assert!(diff.len() < replica.snapshot().len());

    let results = client.get_or_insert_map(RESULTS);
    client
        .transact_mut()
        .apply_update(Update::decode_v1(&diff).unwrap())
        .unwrap();
    assert!(results.contains_key(&client.transact(), "req-1"));
}

#[test]
fn test_concurrent_edits_converge() {
    let replica = replica();
    replica.seed_default();

    let a = client_of(&replica);
    let b = client_of(&replica);
    let a_code = a.get_or_insert_map(CODE);
    let b_nodes = b.get_or_insert_map(NODES);

    let a_sv = a.transact().state_vector();
    a_code.insert(&mut a.transact_mut(), "n", TextPrelim::new("x"));
    let a_update = changes_since(&a, &a_sv);

    let b_sv = b.transact().state_vector();
    b_nodes.remove(&mut b.transact_mut(), "welcome");
    let b_update = changes_since(&b, &b_sv);

    // Each client's update reaches the replica and then the other client.
    replica
        .apply_update(UpdateOrigin::Connection(ConnectionId(1)), &a_update)
        .unwrap();
    replica
        .apply_update(UpdateOrigin::Connection(ConnectionId(2)), &b_update)
        .unwrap();
    b.transact_mut()
        .apply_update(Update::decode_v1(&a_update).unwrap())
        .unwrap();
    a.transact_mut()
        .apply_update(Update::decode_v1(&b_update).unwrap())
        .unwrap();

    let view = |doc: &Doc| {
        let nodes = doc.get_or_insert_map(NODES);
        let code = doc.get_or_insert_map(CODE);
        let txn = doc.transact();
        (
            any_to_json(&nodes.to_json(&txn)),
            any_to_json(&code.to_json(&txn)),
        )
    };
    let (a_nodes, a_code_json) = view(&a);
    let (b_nodes_json, b_code_json) = view(&b);
    assert_eq!(a_nodes, b_nodes_json);
    assert_eq!(a_code_json, b_code_json);
    assert!(a_nodes.get("welcome").is_none());
    assert_eq!(a_code_json["n"], "x");

    let server = replica.to_json();
    assert_eq!(server[NODES], a_nodes);
    assert_eq!(server[CODE], a_code_json);
}
