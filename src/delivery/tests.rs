use super::*;
use std::time::{Duration, Instant};

fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[test]
fn test_upsert_and_get() {
    let mut table = PendingTable::new();
    let key = PeerMessage::new(peer(10001), 7);

    assert_eq!(table.get(&key), None);
    table.upsert(key, Qos2State::Received);
    assert_eq!(table.get(&key), Some(Qos2State::Received));

    table.upsert(key, Qos2State::Completed);
    assert_eq!(table.get(&key), Some(Qos2State::Completed));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_keys_distinguish_peer_and_msg_id() {
    let mut table = DedupTable::new();
    table.upsert(PeerMessage::new(peer(10001), 1), ());

    assert!(table.contains(&PeerMessage::new(peer(10001), 1)));
    assert!(!table.contains(&PeerMessage::new(peer(10002), 1)));
    assert!(!table.contains(&PeerMessage::new(peer(10001), 2)));
}

#[test]
fn test_remove() {
    let mut table = PendingTable::new();
    let key = PeerMessage::new(peer(10001), 3);
    table.upsert(key, Qos2State::Released);

    assert_eq!(table.remove(&key), Some(Qos2State::Released));
    assert_eq!(table.remove(&key), None);
    assert!(table.is_empty());
}

#[test]
fn test_sweep_removes_only_expired_entries() {
    let mut table = PendingTable::new();
    let start = Instant::now();
    let old = PeerMessage::new(peer(10001), 1);
    let fresh = PeerMessage::new(peer(10001), 2);

    table.upsert_at(old, Qos2State::Completed, start);
    table.upsert_at(fresh, Qos2State::Received, start + Duration::from_secs(50));

    let removed = table.sweep_at(start + Duration::from_secs(61), Duration::from_secs(60));
    assert_eq!(removed, 1);
    assert!(!table.contains(&old));
    assert!(table.contains(&fresh));
}

#[test]
fn test_sweep_keeps_entries_within_ttl() {
    let mut table = DedupTable::new();
    table.upsert(PeerMessage::new(peer(10001), 1), ());

    assert_eq!(table.sweep(Duration::from_secs(60)), 0);
    assert_eq!(table.len(), 1);
}

#[test]
fn test_advance_moves_forward_only() {
    let mut table = PendingTable::new();
    let key = PeerMessage::new(peer(10001), 9);
    table.upsert(key, Qos2State::Received);

    assert_eq!(table.advance(&key, Qos2State::Released), Some(Qos2State::Received));
    assert_eq!(table.advance(&key, Qos2State::Completed), Some(Qos2State::Released));
    assert_eq!(table.advance(&key, Qos2State::Received), Some(Qos2State::Completed));
    assert_eq!(table.get(&key), Some(Qos2State::Completed));
}

#[test]
fn test_advance_unknown_key() {
    let mut table: DeliveryTable<u32, ClientQos2State> = DeliveryTable::new();
    assert_eq!(table.advance(&42, ClientQos2State::Completed), None);
    assert!(table.is_empty());
}
