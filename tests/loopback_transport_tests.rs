use std::sync::{Arc, Mutex};

use trdpsim::config::{
    LoggingConfig, MdListenerConfig, MdSenderConfig, NetworkConfig, PayloadSpec, PdPublisherConfig,
    PdSubscriberConfig,
};
use trdpsim::transport::{MdHandler, MdMessage, PdHandler, PdMessage};
use trdpsim::{LoopbackTransport, Transport};

fn transport() -> LoopbackTransport {
    let transport = LoopbackTransport::new();
    transport
        .initialize(&NetworkConfig::default(), &LoggingConfig::default())
        .unwrap();
    transport
}

fn publisher(name: &str, com_id: u32, dest_ip: &str) -> PdPublisherConfig {
    PdPublisherConfig {
        name: name.to_string(),
        com_id,
        dataset_id: 0,
        etb_topo_count: 0,
        op_trn_topo_count: 0,
        source_ip: "10.0.0.1".to_string(),
        dest_ip: dest_ip.to_string(),
        cycle_time_ms: 100,
        redundancy_group: 0,
        use_sequence_counter: true,
        payload: PayloadSpec::default(),
    }
}

fn subscriber(name: &str, com_id: u32, source_ip: &str) -> PdSubscriberConfig {
    PdSubscriberConfig {
        name: name.to_string(),
        com_id,
        etb_topo_count: 0,
        op_trn_topo_count: 0,
        source_ip: source_ip.to_string(),
        dest_ip: "10.0.0.1".to_string(),
        timeout_ms: 0,
        com_id_filter: true,
    }
}

fn pd_sink() -> (PdHandler, Arc<Mutex<Vec<PdMessage>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    (Arc::new(move |m: &PdMessage| sink.lock().unwrap().push(m.clone())), received)
}

fn md_sink() -> (MdHandler, Arc<Mutex<Vec<MdMessage>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    (Arc::new(move |m: &MdMessage| sink.lock().unwrap().push(m.clone())), received)
}

#[test]
fn test_pd_filtering_and_sequence_counters() {
    let transport = transport();
    transport.register_pd_publisher(&publisher("doors", 1000, "239.0.0.1")).unwrap();
    transport.register_pd_publisher(&publisher("brakes", 1100, "239.0.0.1")).unwrap();

    let (handler, doors_rx) = pd_sink();
    transport
        .register_pd_subscriber(&subscriber("cab", 1000, "239.0.0.1"), handler)
        .unwrap();
    let (handler, other_rx) = pd_sink();
    transport
        .register_pd_subscriber(&subscriber("elsewhere", 1000, "239.0.0.2"), handler)
        .unwrap();

    for _ in 0..3 {
        transport.publish_pd("doors", &[0xAB]).unwrap();
    }
    transport.publish_pd("brakes", &[0x01]).unwrap();

    let doors = doors_rx.lock().unwrap();
    let counters: Vec<u64> = doors.iter().map(|m| m.sequence_counter).collect();
    assert_eq!(counters, vec![1, 2, 3]);
    assert!(doors.iter().all(|m| m.com_id == 1000 && m.endpoint == "10.0.0.1"));
    assert!(other_rx.lock().unwrap().is_empty());
}

#[test]
fn test_md_request_reply_round_trip() {
    let transport = Arc::new(transport());
    let sender = MdSenderConfig {
        name: "diag".to_string(),
        com_id: 2000,
        reply_com_id: 2001,
        source_ip: String::new(),
        dest_ip: "10.0.0.2".to_string(),
        cycle_time_ms: 0,
        reply_timeout_ms: 0,
        expect_reply: true,
        payload: PayloadSpec::default(),
    };
    let listener = MdListenerConfig {
        name: "responder".to_string(),
        com_id: 2000,
        source_ip: String::new(),
        dest_ip: "10.0.0.2".to_string(),
        auto_reply: false,
        reply_payload: PayloadSpec::default(),
    };

    let (reply_handler, replies) = md_sink();
    transport.register_md_sender(&sender, Some(reply_handler)).unwrap();
    let (request_handler, requests) = md_sink();
    transport.register_md_listener(&listener, request_handler).unwrap();

    transport.send_md_request("diag", b"STATUS?").unwrap();
    assert_eq!(transport.pending_sessions(), 1);

    let request = requests.lock().unwrap()[0].clone();
    assert_eq!(request.payload, b"STATUS?".to_vec());

    transport.send_md_reply("responder", &request, b"OK").unwrap();
    // Session already consumed; the duplicate is dropped
    transport.send_md_reply("responder", &request, b"OK").unwrap();

    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload, b"OK".to_vec());
    assert_eq!(replies[0].session_id, request.session_id);
    assert_eq!(transport.pending_sessions(), 0);
}

#[test]
fn test_address_wildcard_on_one_side_only() {
    let transport = transport();
    // Publisher leaves its destination open; the subscriber names a source
    transport.register_pd_publisher(&publisher("doors", 1000, "")).unwrap();
    let (handler, received) = pd_sink();
    transport
        .register_pd_subscriber(&subscriber("cab", 1000, "239.0.0.1"), handler)
        .unwrap();

    transport.publish_pd("doors", &[0x01]).unwrap();
    assert_eq!(received.lock().unwrap().len(), 1);

    // And the other way round: subscriber open, publisher addressed
    let other = LoopbackTransport::new();
    other
        .initialize(&NetworkConfig::default(), &LoggingConfig::default())
        .unwrap();
    other.register_pd_publisher(&publisher("doors", 1000, "239.0.0.1")).unwrap();
    let (handler, received) = pd_sink();
    other
        .register_pd_subscriber(&subscriber("cab", 1000, ""), handler)
        .unwrap();
    other.publish_pd("doors", &[0x01]).unwrap();
    assert_eq!(received.lock().unwrap().len(), 1);
}
