use super::event_queue::MAX_EVENT_TOPIC_LEN;
use super::{
    Client, ClientError, EVENT_QUEUE_CAPACITY, Event, EventQueue, Qos2Tracker, QueueError,
    RetryPolicy, Stage,
};
use crate::broker::Broker;
use crate::delivery::ClientQos2State;
use crate::transport::DatagramTransport;
use crate::transport::codec;
use crate::transport::message::{ControlType, MsgType, QosLevel};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn publish_event(msg_id: u32) -> Event {
    Event::new(MsgType::Publish, msg_id, "t", vec![msg_id as u8])
}

#[test]
fn test_queue_fifo_order() {
    let queue = EventQueue::new();
    for id in 1..=3 {
        queue.push(publish_event(id)).unwrap();
    }

    assert_eq!(queue.len(), 3);
    for id in 1..=3 {
        assert_eq!(queue.pop().unwrap().msg_id, id);
    }
    assert!(queue.is_empty());
}

#[test]
fn test_queue_overflow_leaves_contents_intact() {
    let queue = EventQueue::new();
    assert_eq!(queue.capacity(), EVENT_QUEUE_CAPACITY);

    for id in 0..EVENT_QUEUE_CAPACITY as u32 {
        queue.push(publish_event(id)).unwrap();
    }
    assert_eq!(queue.push(publish_event(999)), Err(QueueError::Full));
    assert_eq!(queue.len(), EVENT_QUEUE_CAPACITY);

    for id in 0..EVENT_QUEUE_CAPACITY as u32 {
        let event = queue.pop().unwrap();
        assert_eq!(event.msg_id, id);
        assert_eq!(event.payload, vec![id as u8]);
    }
    assert!(queue.is_empty());
}

#[test]
fn test_queue_custom_capacity() {
    let queue = EventQueue::with_capacity(2);
    queue.push(publish_event(1)).unwrap();
    queue.push(publish_event(2)).unwrap();
    assert_eq!(queue.push(publish_event(3)), Err(QueueError::Full));

    queue.pop().unwrap();
    assert!(queue.push(publish_event(3)).is_ok());
}

#[test]
fn test_queue_remove_matching_preserves_order() {
    let queue = EventQueue::new();
    queue.push(publish_event(1)).unwrap();
    queue.push(Event::ack(7)).unwrap();
    queue.push(publish_event(2)).unwrap();
    queue.push(Event::ack(8)).unwrap();

    let removed = queue.remove_matching(|event| event.is_ack_for(7)).unwrap();
    assert_eq!(removed.msg_type, MsgType::Ack);
    assert_eq!(removed.msg_id, 7);

    assert!(queue.remove_matching(|event| event.is_ack_for(99)).is_none());
    assert_eq!(queue.len(), 3);

    let order: Vec<u32> = (0..3).map(|_| queue.pop().unwrap().msg_id).collect();
    assert_eq!(order, vec![1, 2, 8]);
}

#[test]
fn test_queue_remove_all_drops_every_match() {
    let queue = EventQueue::new();
    queue.push(Event::ack(5)).unwrap();
    queue.push(publish_event(1)).unwrap();
    queue.push(Event::ack(5)).unwrap();
    queue.push(Event::ack(6)).unwrap();

    assert_eq!(queue.remove_all(|event| event.is_ack_for(5)), 2);
    assert_eq!(queue.remove_all(|event| event.is_ack_for(5)), 0);

    let order: Vec<u32> = (0..2).map(|_| queue.pop().unwrap().msg_id).collect();
    assert_eq!(order, vec![1, 6]);
}

#[test]
fn test_queue_push_bounds_hand_built_topics() {
    let queue = EventQueue::new();
    queue
        .push(Event {
            msg_type: MsgType::Publish,
            msg_id: 1,
            topic: "é".repeat(100),
            payload: Vec::new(),
            timestamp: 0,
        })
        .unwrap();
    queue
        .push(Event {
            topic: "a".repeat(200),
            ..publish_event(2)
        })
        .unwrap();

    let wide = queue.pop().unwrap();
    assert_eq!(wide.topic.len(), 126);
    assert!(wide.topic.chars().all(|c| c == 'é'));
    assert_eq!(queue.pop().unwrap().topic.len(), MAX_EVENT_TOPIC_LEN);
}

#[test]
fn test_queue_pop_blocks_until_push() {
    let queue = Arc::new(EventQueue::new());
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.pop())
    };

    thread::sleep(Duration::from_millis(50));
    queue.push(publish_event(5)).unwrap();

    assert_eq!(consumer.join().unwrap().unwrap().msg_id, 5);
}

#[test]
fn test_queue_close_wakes_waiting_pop() {
    let queue = Arc::new(EventQueue::new());
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.pop())
    };

    thread::sleep(Duration::from_millis(50));
    queue.close();

    assert_eq!(consumer.join().unwrap(), Err(QueueError::Closed));
}

#[test]
fn test_queue_close_drains_then_reports_closed() {
    let queue = EventQueue::new();
    queue.push(publish_event(1)).unwrap();
    queue.close();

    assert!(queue.is_closed());
    assert_eq!(queue.push(publish_event(2)), Err(QueueError::Closed));
    assert_eq!(queue.pop().unwrap().msg_id, 1);
    assert_eq!(queue.pop(), Err(QueueError::Closed));
}

#[test]
fn test_queue_pop_timeout() {
    let queue = EventQueue::new();
    assert_eq!(queue.pop_timeout(Duration::from_millis(20)), Ok(None));

    queue.push(publish_event(3)).unwrap();
    let event = queue.pop_timeout(Duration::from_millis(20)).unwrap().unwrap();
    assert_eq!(event.msg_id, 3);
}

#[test]
fn test_event_topic_is_bounded() {
    let long = "a".repeat(200);
    let event = Event::new(MsgType::Publish, 1, &long, Vec::new());
    assert_eq!(event.topic.len(), MAX_EVENT_TOPIC_LEN);

    // 2-byte chars: byte 127 falls inside a char, so the cut moves back to 126.
    let wide = "é".repeat(100);
    let event = Event::new(MsgType::Publish, 1, &wide, Vec::new());
    assert_eq!(event.topic.len(), 126);
    assert!(event.topic.chars().all(|c| c == 'é'));

    let event = Event::new(MsgType::Publish, 1, "short/topic", Vec::new());
    assert_eq!(event.topic, "short/topic");
    assert!(event.timestamp > 0);
}

#[test]
fn test_qos2_tracker_moves_forward_only() {
    let tracker = Qos2Tracker::new();
    assert_eq!(tracker.state(1), ClientQos2State::None);
    assert!(!tracker.advance(1, ClientQos2State::WaitComplete));
    assert_eq!(tracker.state(1), ClientQos2State::None);

    tracker.begin(1);
    assert_eq!(tracker.state(1), ClientQos2State::WaitReceived);
    assert!(tracker.advance(1, ClientQos2State::WaitComplete));
    assert!(!tracker.advance(1, ClientQos2State::WaitReceived));
    assert!(!tracker.advance(1, ClientQos2State::WaitComplete));
    assert_eq!(tracker.state(1), ClientQos2State::WaitComplete);
    assert!(tracker.advance(1, ClientQos2State::Completed));
    assert_eq!(tracker.state(1), ClientQos2State::Completed);

    tracker.remove(1);
    assert_eq!(tracker.state(1), ClientQos2State::None);
    assert!(tracker.is_empty());
}

#[test]
fn test_retry_policy_attempts() {
    let policy = RetryPolicy {
        max_retries: 4,
        ..RetryPolicy::default()
    };
    assert_eq!(policy.attempts(), 5);
}

const BROKER: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 7000);
const CLIENT: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 7001);

type Loss = Box<dyn Fn(usize) -> bool + Send + Sync>;
type SentLog = Arc<Mutex<Vec<Vec<u8>>>>;

fn never() -> Loss {
    Box::new(|_| false)
}

fn lose(indices: &[usize]) -> Loss {
    let indices = indices.to_vec();
    Box::new(move |index| indices.contains(&index))
}

/// In-process transport wired to a real broker engine on another thread.
/// Sends and replies can be dropped by index.
struct MockTransport {
    to_broker: Mutex<mpsc::Sender<Vec<u8>>>,
    from_broker: Mutex<mpsc::Receiver<Vec<u8>>>,
    lose_send: Loss,
    sent: SentLog,
}

impl DatagramTransport for MockTransport {
    fn send_to(&self, bytes: &[u8], _dest: SocketAddr) -> io::Result<usize> {
        let index = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(bytes.to_vec());
            sent.len() - 1
        };
        if !(self.lose_send)(index) {
            let _ = self.to_broker.lock().unwrap().send(bytes.to_vec());
        }
        Ok(bytes.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let received = self
            .from_broker
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_millis(10));
        match received {
            Ok(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok((packet.len(), BROKER))
            }
            Err(RecvTimeoutError::Timeout) => Err(io::ErrorKind::WouldBlock.into()),
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(Duration::from_millis(10));
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_millis(50),
        max_retries,
        poll_interval: Duration::from_millis(1),
    }
}

fn mock_client(lose_send: Loss, lose_reply: Loss) -> (Client<MockTransport>, SentLog) {
    let (to_broker, broker_inbox) = mpsc::channel::<Vec<u8>>();
    let (broker_outbox, from_broker) = mpsc::channel::<Vec<u8>>();

    thread::spawn(move || {
        let mut broker = Broker::new();
        let mut replies = 0;
        while let Ok(packet) = broker_inbox.recv() {
            for out in broker.handle_datagram(CLIENT, &packet) {
                let index = replies;
                replies += 1;
                if lose_reply(index) {
                    continue;
                }
                if broker_outbox.send(out.bytes).is_err() {
                    return;
                }
            }
        }
    });

    let sent = SentLog::default();
    let transport = MockTransport {
        to_broker: Mutex::new(to_broker),
        from_broker: Mutex::new(from_broker),
        lose_send,
        sent: sent.clone(),
    };
    let mut client = Client::with_transport(transport, BROKER).unwrap();
    client.set_retry_policy(fast_policy(3));
    (client, sent)
}

fn sent_headers(sent: &SentLog) -> Vec<(MsgType, u32)> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|bytes| {
            let header = codec::decode_header(bytes).unwrap();
            (header.msg_type, header.msg_id)
        })
        .collect()
}

#[test]
fn test_client_message_ids_start_at_one() {
    let (client, sent) = mock_client(never(), never());
    client.subscribe("a/b").unwrap();
    client.publish("a/b", b"x").unwrap();
    client.publish("a/b", b"y").unwrap();

    assert_eq!(
        sent_headers(&sent),
        vec![
            (MsgType::Subscribe, 1),
            (MsgType::Publish, 2),
            (MsgType::Publish, 3)
        ]
    );
}

#[test]
fn test_client_qos0_sends_once() {
    let (client, sent) = mock_client(never(), never());
    assert_eq!(client.qos(), QosLevel::AtMostOnce);
    client.publish("t", b"fire and forget").unwrap();

    assert_eq!(sent.lock().unwrap().len(), 1);
}

#[test]
fn test_client_qos1_acknowledged() {
    let (client, sent) = mock_client(never(), never());
    client
        .publish_with_qos("t", b"x", QosLevel::AtLeastOnce)
        .unwrap();

    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(client.pending_events(), 0);
}

/// Answers every QoS1 PUBLISH with two identical ACKs, as a broker does when
/// the first ACK is slow and the publish is retransmitted.
#[derive(Default)]
struct DoubleAckTransport {
    replies: Mutex<VecDeque<Vec<u8>>>,
}

impl DatagramTransport for DoubleAckTransport {
    fn send_to(&self, bytes: &[u8], _dest: SocketAddr) -> io::Result<usize> {
        let header = codec::decode_header(bytes).unwrap();
        if header.msg_type == MsgType::Publish && header.qos_level == QosLevel::AtLeastOnce {
            let ack =
                codec::encode(&crate::transport::Header::ack(header.msg_id), None, &[]).unwrap();
            let mut replies = self.replies.lock().unwrap();
            replies.push_back(ack.clone());
            replies.push_back(ack);
        }
        Ok(bytes.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok((packet.len(), BROKER))
            }
            None => {
                thread::sleep(Duration::from_millis(1));
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }
}

#[test]
fn test_client_qos1_duplicate_acks_do_not_accumulate() {
    let mut client = Client::with_transport(DoubleAckTransport::default(), BROKER).unwrap();
    client.set_retry_policy(fast_policy(3));

    for _ in 0..200 {
        client
            .publish_with_qos("t", b"x", QosLevel::AtLeastOnce)
            .unwrap();
    }
    thread::sleep(Duration::from_millis(100));

    assert_eq!(client.pending_events(), 0);
    client.close();
}

#[test]
fn test_client_qos1_recovers_from_lost_sends() {
    let (mut client, sent) = mock_client(lose(&[0, 1]), never());
    client.set_qos(QosLevel::AtLeastOnce);
    client.publish("t", b"x").unwrap();

    let headers = sent_headers(&sent);
    assert_eq!(headers.len(), 3);
    assert!(headers.iter().all(|&header| header == (MsgType::Publish, 1)));
}

#[test]
fn test_client_qos1_gives_up_after_max_retries() {
    let (mut client, sent) = mock_client(Box::new(|_| true), never());
    client.set_retry_policy(fast_policy(2));

    let err = client
        .publish_with_qos("t", b"x", QosLevel::AtLeastOnce)
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::RetriesExhausted {
            msg_id: 1,
            stage: Stage::Ack,
            attempts: 3
        }
    ));
    assert_eq!(sent.lock().unwrap().len(), 3);
}

#[test]
fn test_client_qos1_lost_ack_delivers_once() {
    // replies: 0 = delivery to ourselves, 1 = ACK (lost), 2 = ACK for the resend
    let (client, _sent) = mock_client(never(), lose(&[1]));
    client.subscribe("loop/back").unwrap();
    client
        .publish_with_qos("loop/back", b"once", QosLevel::AtLeastOnce)
        .unwrap();

    let event = client
        .next_event_timeout(Duration::from_secs(1))
        .unwrap()
        .unwrap();
    assert_eq!(event.msg_type, MsgType::Publish);
    assert_eq!(event.topic, "loop/back");
    assert_eq!(event.payload, b"once");

    assert!(
        client
            .next_event_timeout(Duration::from_millis(100))
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_client_qos2_handshake() {
    let (client, sent) = mock_client(never(), never());
    client
        .publish_with_qos("t", b"x", QosLevel::ExactlyOnce)
        .unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(codec::decode(&sent[0]).unwrap().header.msg_type, MsgType::Publish);
    let release = codec::decode_control(&sent[1]).unwrap();
    assert_eq!(release.ctrl_type, ControlType::Release);
    assert_eq!(release.header.msg_id, 1);
}

#[test]
fn test_client_qos2_recovers_from_lost_release() {
    let (client, sent) = mock_client(lose(&[1]), never());
    client
        .publish_with_qos("t", b"x", QosLevel::ExactlyOnce)
        .unwrap();

    assert_eq!(
        sent_headers(&sent),
        vec![
            (MsgType::Publish, 1),
            (MsgType::Control, 1),
            (MsgType::Control, 1)
        ]
    );
}

#[test]
fn test_client_qos2_lost_received_delivers_once() {
    // replies: 0 = delivery to ourselves, 1 = RECEIVED (lost), 2 = RECEIVED, 3 = COMPLETE
    let (client, _sent) = mock_client(never(), lose(&[1]));
    client.subscribe("exact").unwrap();
    client
        .publish_with_qos("exact", b"one", QosLevel::ExactlyOnce)
        .unwrap();

    let event = client
        .next_event_timeout(Duration::from_secs(1))
        .unwrap()
        .unwrap();
    assert_eq!(event.payload, b"one");
    assert!(
        client
            .next_event_timeout(Duration::from_millis(100))
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_client_qos2_gives_up_waiting_for_complete() {
    let (mut client, _sent) = mock_client(Box::new(|index| index > 0), never());
    client.set_retry_policy(fast_policy(1));

    let err = client
        .publish_with_qos("t", b"x", QosLevel::ExactlyOnce)
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::RetriesExhausted {
            stage: Stage::Complete,
            attempts: 2,
            ..
        }
    ));
}

#[test]
fn test_client_close_unblocks_next_event() {
    let (mut client, _sent) = mock_client(never(), never());

    thread::scope(|scope| {
        let waiter = scope.spawn(|| client.next_event());
        thread::sleep(Duration::from_millis(50));
        client.shutdown();
        assert!(matches!(waiter.join().unwrap(), Err(ClientError::Closed)));
    });

    client.close();
    assert!(client.is_closed());
    assert!(matches!(client.publish("t", b"x"), Err(ClientError::Closed)));
}

#[test]
fn test_client_over_udp_socket() {
    let broker_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    broker_socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let broker_addr = broker_socket.local_addr().unwrap();

    let mut client = Client::connect(broker_addr).unwrap();
    client.subscribe("udp/topic").unwrap();

    let mut buf = [0u8; 512];
    let (len, client_addr) = broker_socket.recv_from(&mut buf).unwrap();
    let subscribe = codec::decode(&buf[..len]).unwrap();
    assert_eq!(subscribe.header.msg_type, MsgType::Subscribe);
    assert_eq!(subscribe.topic(), "udp/topic");

    let delivery = codec::encode(
        &crate::transport::Header::publish(QosLevel::AtMostOnce, 40),
        Some("udp/topic"),
        b"hi",
    )
    .unwrap();
    let ack = codec::encode(&crate::transport::Header::ack(41), None, &[]).unwrap();
    broker_socket.send_to(&ack, client_addr).unwrap();
    broker_socket.send_to(&delivery, client_addr).unwrap();

    let event = client
        .next_event_timeout(Duration::from_secs(2))
        .unwrap()
        .unwrap();
    assert_eq!(event.msg_id, 40);
    assert_eq!(event.payload, b"hi");

    client.close();
}
