/*!
 * Channel Tests
 * Duplex endpoints over memory and socket transports
 */

use pretty_assertions::assert_eq;
use rig_kernel::ipc::{link_pair, pair, Transport};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    seq: u32,
    body: String,
}

#[test]
fn test_memory_channel_preserves_order() {
    let (left, right) = pair::<Ping, u32>();
    for seq in 0..100 {
        left.send(Ping {
            seq,
            body: format!("msg-{}", seq),
        })
        .unwrap();
    }
    for seq in 0..100 {
        assert_eq!(right.recv().unwrap().seq, seq);
    }
}

#[test]
fn test_recv_blocks_until_message() {
    let (left, right) = pair::<u32, u32>();
    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        left.send(42).unwrap();
        left
    });
    assert_eq!(right.recv().unwrap(), 42);
    let _left = sender.join().unwrap();
}

#[test]
fn test_memory_link_pair_opens_in_place() {
    let (a, b) = link_pair::<u8, u8>(Transport::Memory).unwrap();
    let a = a.open().unwrap();
    let b = b.open().unwrap();
    a.send(9).unwrap();
    assert_eq!(b.recv().unwrap(), 9);
}

#[cfg(unix)]
mod socket {
    use super::*;
    use pretty_assertions::assert_eq;
    use rig_kernel::ipc::socket_pair;

    #[test]
    fn test_socket_channel_round_trip() {
        let (a, b) = socket_pair::<Ping, u32>().unwrap();
        let a = a.open().unwrap();
        let b = b.open().unwrap();
        assert_eq!(a.transport(), Transport::Socket);

        let ping = Ping {
            seq: 7,
            body: "over the wire".to_string(),
        };
        a.send(ping.clone()).unwrap();
        assert_eq!(b.recv().unwrap(), ping);

        b.send(8).unwrap();
        assert_eq!(a.recv_timeout(Duration::from_secs(1)).unwrap(), Some(8));
    }

    #[test]
    fn test_socket_peer_drop_is_closed() {
        let (a, b) = socket_pair::<u32, u32>().unwrap();
        let a = a.open().unwrap();
        let b = b.open().unwrap();

        b.send(1).unwrap();
        drop(b);

        // Messages sent before the drop still arrive
        assert_eq!(a.recv().unwrap(), 1);
        assert!(a.recv().unwrap_err().is_closed());
    }

    #[test]
    fn test_socket_large_payload() {
        let (a, b) = socket_pair::<Vec<f64>, ()>().unwrap();
        let a = a.open().unwrap();
        let b = b.open().unwrap();

        let payload: Vec<f64> = (0..100_000).map(|i| i as f64 * 0.5).collect();
        a.send(payload.clone()).unwrap();
        assert_eq!(b.recv().unwrap(), payload);
    }
}
