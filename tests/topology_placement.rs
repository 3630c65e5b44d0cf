use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use test_log::test;
use volume_store::{
    topology::{JoinMessage, PlacementOption, Topology},
    Error, MemorySequencer, ReplicaPlacement, Ttl, VolumeId, VolumeInfo, CURRENT_VERSION,
};

fn new_topology(volume_size_limit: u64) -> (Topology, volume_store::topology::TopologyEvents) {
    Topology::new(
        "topo",
        None,
        Arc::new(MemorySequencer::new()),
        volume_size_limit,
        5,
    )
}

fn volume_info(id: u32, size: u64) -> VolumeInfo {
    VolumeInfo {
        id: VolumeId(id),
        size,
        replica_placement: ReplicaPlacement::default(),
        ttl: Ttl::EMPTY,
        collection: String::new(),
        version: CURRENT_VERSION,
        file_count: 1,
        delete_count: 0,
        deleted_byte_count: 0,
        read_only: false,
    }
}

fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[test]
fn counters_propagate_on_link_and_unlink() {
    let (topo, _events) = new_topology(1024);

    let dc = topo.get_or_create_data_center("dc1");
    let rack = dc.get_or_create_rack("rack1");
    let dn = rack.get_or_create_data_node("127.0.0.1", 8080, "127.0.0.1:8080", 8);

    for node in [topo.root(), &dc, &rack] {
        assert_eq!(8, node.max_volume_count());
        assert_eq!(0, node.volume_count());
    }

    dn.add_or_update_volume(volume_info(5, 100));
    for node in [topo.root(), &dc, &rack, &dn] {
        assert_eq!(1, node.volume_count());
        assert_eq!(1, node.active_volume_count());
        assert_eq!(VolumeId(5), node.max_volume_id());
    }

    topo.unregister_data_node(&dn);
    for node in [topo.root(), &dc, &rack] {
        assert_eq!(0, node.max_volume_count());
        assert_eq!(0, node.volume_count());
        assert_eq!(0, node.active_volume_count());
    }
}

#[test]
fn counters_aggregate_over_subtrees() {
    let (topo, _events) = new_topology(1024);

    let dc1 = topo.get_or_create_data_center("dc1");
    let dc2 = topo.get_or_create_data_center("dc2");
    let rack1 = dc1.get_or_create_rack("rack1");
    let rack2 = dc1.get_or_create_rack("rack2");
    let rack3 = dc2.get_or_create_rack("rack1");

    rack1.get_or_create_data_node("10.0.0.1", 8080, "", 3);
    rack1.get_or_create_data_node("10.0.0.2", 8080, "", 4);
    rack2.get_or_create_data_node("10.0.0.3", 8080, "", 5);
    rack3.get_or_create_data_node("10.0.0.4", 8080, "", 7);

    assert_eq!(7, rack1.max_volume_count());
    assert_eq!(5, rack2.max_volume_count());
    assert_eq!(12, dc1.max_volume_count());
    assert_eq!(7, dc2.max_volume_count());
    assert_eq!(19, topo.root().max_volume_count());

    // An aggregate is always the sum over the children
    for node in [topo.root(), &dc1, &dc2, &rack1, &rack2, &rack3] {
        let sum: i64 = node.children().iter().map(|c| c.max_volume_count()).sum();
        if !node.is_data_node() {
            assert_eq!(node.max_volume_count(), sum);
        }
    }
}

#[test]
fn placement_returns_distinct_nodes() {
    let (topo, _events) = new_topology(1024);

    let dc = topo.get_or_create_data_center("dc1");
    let rack = dc.get_or_create_rack("rack1");
    for i in 1..=3 {
        rack.get_or_create_data_node(&format!("10.0.0.{i}"), 8080, "", 1);
    }

    let (first, rest) = rack
        .randomly_pick_nodes(3, |n| {
            if n.free_space() > 0 {
                Ok(())
            } else {
                Err("no free space".to_string())
            }
        })
        .expect("three nodes with free space exist");

    assert_eq!(2, rest.len());
    let mut ids = vec![first.id().to_string()];
    ids.extend(rest.iter().map(|n| n.id().to_string()));
    ids.sort();
    ids.dedup();
    assert_eq!(3, ids.len());
}

#[test]
fn placement_fails_without_enough_free_nodes() {
    let (topo, _events) = new_topology(1024);

    let dc = topo.get_or_create_data_center("dc1");
    let rack = dc.get_or_create_rack("rack1");
    for i in 1..=3 {
        rack.get_or_create_data_node(&format!("10.0.0.{i}"), 8080, "", 1);
    }
    // Fill one node's only slot
    let full = rack.get_or_create_data_node("10.0.0.3", 8080, "", 1);
    full.add_or_update_volume(volume_info(1, 10));

    let result = rack.randomly_pick_nodes(3, |n| {
        if n.free_space() > 0 {
            Ok(())
        } else {
            Err("no free space".to_string())
        }
    });
    assert!(matches!(result, Err(Error::CapacityExhausted(_))));
}

#[test]
fn reserve_one_volume_finds_a_leaf() {
    let (topo, _events) = new_topology(1024);

    let dc = topo.get_or_create_data_center("dc1");
    let rack = dc.get_or_create_rack("rack1");
    rack.get_or_create_data_node("10.0.0.1", 8080, "", 2);
    rack.get_or_create_data_node("10.0.0.2", 8080, "", 2);

    for r in 0..4 {
        let dn = topo.root().reserve_one_volume(r).expect("slot exists");
        assert!(dn.is_data_node());
    }
    assert!(matches!(
        topo.root().reserve_one_volume(4),
        Err(Error::CapacityExhausted(_))
    ));
}

#[test]
fn join_registers_volumes_and_advances_sequencer() {
    let (topo, _events) = new_topology(1024);

    let join = JoinMessage {
        is_init: true,
        ip: "10.0.0.1".to_string(),
        port: 8080,
        public_url: "10.0.0.1:8080".to_string(),
        max_volume_count: 8,
        max_file_key: 500,
        data_center: "dc1".to_string(),
        rack: "rack1".to_string(),
        volumes: vec![volume_info(1, 10), volume_info(2, 20)],
    };
    topo.process_join(&join);

    assert_eq!(501, topo.sequence().peek());
    assert_eq!(2, topo.root().volume_count());
    assert_eq!(VolumeId(3), topo.next_volume_id());

    let locations = topo.lookup("", VolumeId(1)).expect("volume 1 is registered");
    assert_eq!(1, locations.len());
    assert_eq!("10.0.0.1:8080", locations[0].id());

    // A follow-up heartbeat without volume 2 unregisters it
    let rejoin = JoinMessage {
        is_init: false,
        volumes: vec![volume_info(1, 10)],
        ..join
    };
    topo.process_join(&rejoin);

    assert_eq!(1, topo.root().volume_count());
    assert!(topo.lookup("", VolumeId(2)).is_none());
}

#[test]
fn pick_for_write_hands_out_file_ids() {
    let (topo, _events) = new_topology(1024);

    let join = JoinMessage {
        is_init: true,
        ip: "10.0.0.1".to_string(),
        port: 8080,
        public_url: "10.0.0.1:8080".to_string(),
        max_volume_count: 8,
        max_file_key: 0,
        data_center: "dc1".to_string(),
        rack: "rack1".to_string(),
        volumes: vec![volume_info(1, 10)],
    };
    topo.process_join(&join);

    let option = PlacementOption::default();
    assert!(topo.has_writable_volume(&option));

    let (fid, count, head) = topo.pick_for_write(3, &option).expect("writable volume");
    assert_eq!(VolumeId(1), fid.volume_id);
    assert_eq!(1, fid.key);
    assert_eq!(3, count);
    assert_eq!("10.0.0.1:8080", head.id());

    let (fid, _, _) = topo.pick_for_write(1, &option).expect("writable volume");
    assert_eq!(4, fid.key);
}

#[test]
fn full_volumes_leave_write_rotation() {
    let (topo, _events) = new_topology(100);

    let join = JoinMessage {
        is_init: true,
        ip: "10.0.0.1".to_string(),
        port: 8080,
        public_url: "10.0.0.1:8080".to_string(),
        max_volume_count: 8,
        max_file_key: 0,
        data_center: "dc1".to_string(),
        rack: "rack1".to_string(),
        volumes: vec![volume_info(1, 200)],
    };
    topo.process_join(&join);

    assert!(!topo.has_writable_volume(&PlacementOption::default()));
    assert!(matches!(
        topo.pick_for_write(1, &PlacementOption::default()),
        Err(Error::CapacityExhausted(_))
    ));
}

#[test]
fn dead_nodes_are_reported_once_and_recover() {
    let (topo, events) = new_topology(1024);

    let dc = topo.get_or_create_data_center("dc1");
    let rack = dc.get_or_create_rack("rack1");
    let dn = rack.get_or_create_data_node("10.0.0.1", 8080, "", 1);
    dn.set_last_seen(now_seconds() - 3600);

    std::thread::scope(|s| {
        s.spawn(|| topo.collect_dead_nodes_and_full_volumes());
        let dead = events.dead_nodes.recv().expect("dead node reported");
        assert_eq!("10.0.0.1:8080", dead.id());
        assert!(dead.is_dead());
    });

    // A second sweep stays quiet: the node is already marked dead
    topo.collect_dead_nodes_and_full_volumes();

    // Rejoining revives the node and reports the recovery
    std::thread::scope(|s| {
        s.spawn(|| {
            rack.get_or_create_data_node("10.0.0.1", 8080, "", 1);
        });
        let recovered = events.recovered_nodes.recv().expect("recovery reported");
        assert_eq!("10.0.0.1:8080", recovered.id());
        assert!(!recovered.is_dead());
    });
}
