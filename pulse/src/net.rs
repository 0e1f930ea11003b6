use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::{decode, encode, Error, Pulse, Result, MAX_DATAGRAM_LEN};

/// How often a running listener wakes up to look at its stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves `host` to its first IPv4 address. `localhost` often lists `::1`
/// first, which an IPv4 socket cannot reach.
pub fn resolve_v4(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| Error::Unresolved(format!("{host}:{port}")))
}

/// Sends `pulse` to `dest` as a single datagram from an ephemeral port and
/// returns the number of bytes sent. Does not wait for any answer.
pub fn send_pulse(pulse: &Pulse, dest: SocketAddr) -> Result<usize> {
    let payload = encode(pulse)?;
    let local: SocketAddr = if dest.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local)?;
    let sent = socket.send_to(&payload, dest)?;
    debug!("sent {sent} of {} bytes to {dest}", payload.len());

    Ok(sent)
}

/// A receive that came back without data: the read timeout elapsed, or a
/// signal such as Ctrl-C interrupted it. `recvfrom` with a timeout is not
/// restarted after a signal, so `Interrupted` must not end the loop.
fn is_poll_wakeup(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

pub struct Listener {
    socket: UdpSocket,
    // One spare byte so an oversized datagram shows up as len > MAX_DATAGRAM_LEN.
    buf: Vec<u8>,
}

impl Listener {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self {
            socket,
            buf: vec![0; MAX_DATAGRAM_LEN + 1],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Waits for one datagram and decodes it as JSON.
    ///
    /// Returns `Ok(None)` if the read timeout elapsed, a signal cut the wait
    /// short, or the datagram was dropped for exceeding `MAX_DATAGRAM_LEN`.
    /// A payload that is not valid JSON is an `Error::Decode`.
    pub fn recv(&mut self) -> Result<Option<(SocketAddr, Value)>> {
        let (len, src) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if is_poll_wakeup(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if len > MAX_DATAGRAM_LEN {
            warn!("dropping datagram from {src}: larger than {MAX_DATAGRAM_LEN} bytes");
            return Ok(None);
        }

        let value = decode(&self.buf[..len])?;
        Ok(Some((src, value)))
    }

    /// Receives until `stop` is set, handing every decoded message to
    /// `on_message`. Nothing is reported once `stop` has been observed.
    pub fn run<F>(&mut self, stop: &AtomicBool, mut on_message: F) -> Result<()>
    where
        F: FnMut(SocketAddr, Value),
    {
        self.socket.set_read_timeout(Some(POLL_INTERVAL))?;

        while !stop.load(Ordering::SeqCst) {
            let received = self.recv()?;
            if stop.load(Ordering::SeqCst) {
                break;
            }

            if let Some((src, value)) = received {
                info!("received message from {src}.");
                on_message(src, value);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
fn loopback_listener() -> Listener {
    Listener::bind((Ipv4Addr::LOCALHOST, 0).into()).unwrap()
}

#[test]
fn test_poll_wakeup() {
    assert!(is_poll_wakeup(&io::Error::from(ErrorKind::Interrupted)));
    assert!(is_poll_wakeup(&io::Error::from(ErrorKind::WouldBlock)));
    assert!(is_poll_wakeup(&io::Error::from(ErrorKind::TimedOut)));
    assert!(!is_poll_wakeup(&io::Error::from(ErrorKind::ConnectionRefused)));
    assert!(!is_poll_wakeup(&io::Error::from(ErrorKind::PermissionDenied)));
}

#[test]
fn test_resolve_v4() {
    let addr = resolve_v4("127.0.0.1", crate::PULSE_PORT).unwrap();

    assert!(addr.is_ipv4());
    assert_eq!(addr.port(), 40001);
}

#[test]
fn test_resolve_v6_only() {
    let res = resolve_v4("::1", crate::LISTEN_PORT);

    assert!(matches!(res, Err(Error::Unresolved(_))));
}

#[test]
fn test_send_without_reply() {
    let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let dest = silent.local_addr().unwrap();

    let sent = send_pulse(&Pulse::default(), dest).unwrap();

    assert_eq!(sent, br#"{"1":3.0}"#.len());
}

#[test]
fn test_receive_literal_pulse() {
    let mut listener = loopback_listener();
    let dest = listener.local_addr().unwrap();

    send_pulse(&Pulse::default(), dest).unwrap();
    let (src, value) = listener.recv().unwrap().unwrap();

    dbg!(&value);

    assert!(src.ip().is_loopback());
    assert_eq!(value, serde_json::json!({"1": 3.0}));
    assert_eq!(serde_json::from_value::<Pulse>(value).unwrap(), Pulse::default());
}

#[test]
fn test_keeps_key_order() {
    let mut listener = loopback_listener();
    let raw = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    raw.send_to(br#"{"b":1,"a":2}"#, listener.local_addr().unwrap())
        .unwrap();

    let (_, value) = listener.recv().unwrap().unwrap();

    assert_eq!(value.to_string(), r#"{"b":1,"a":2}"#);
}

#[test]
fn test_keeps_listening() {
    let mut listener = loopback_listener();
    let dest = listener.local_addr().unwrap();
    for i in 0..3 {
        send_pulse(&Pulse::new(i.to_string(), i as f64), dest).unwrap();
    }

    let stop = AtomicBool::new(false);
    let mut received = vec![];
    listener
        .run(&stop, |_, value| {
            received.push(value);
            if received.len() == 3 {
                stop.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    assert_eq!(
        received,
        vec![
            serde_json::json!({"0": 0.0}),
            serde_json::json!({"1": 1.0}),
            serde_json::json!({"2": 2.0}),
        ]
    );
}

#[test]
fn test_stop_discards_pending() {
    let mut listener = loopback_listener();
    send_pulse(&Pulse::default(), listener.local_addr().unwrap()).unwrap();

    let stop = AtomicBool::new(true);
    let mut calls = 0;
    listener.run(&stop, |_, _| calls += 1).unwrap();

    assert_eq!(calls, 0);
}

#[test]
fn test_stop_while_idle() {
    let mut listener = loopback_listener();
    let stop = std::sync::Arc::new(AtomicBool::new(false));

    let flag = stop.clone();
    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(250));
        flag.store(true, Ordering::SeqCst);
    });

    let mut calls = 0;
    listener.run(&stop, |_, _| calls += 1).unwrap();
    interrupter.join().unwrap();

    assert_eq!(calls, 0);
}

#[test]
fn test_oversized_datagram_dropped() {
    let mut listener = loopback_listener();
    let dest = listener.local_addr().unwrap();
    let raw = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

    // Valid JSON, but too long to be accepted.
    let mut padded = br#"{"1": 3.0}"#.to_vec();
    padded.resize(2 * MAX_DATAGRAM_LEN, b' ');
    raw.send_to(&padded, dest).unwrap();
    send_pulse(&Pulse::new("after", 1.5), dest).unwrap();

    let stop = AtomicBool::new(false);
    let mut received = vec![];
    listener
        .run(&stop, |_, value| {
            received.push(value);
            stop.store(true, Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(received, vec![serde_json::json!({"after": 1.5})]);
}

#[test]
fn test_largest_accepted_datagram() {
    let mut listener = loopback_listener();
    let dest = listener.local_addr().unwrap();
    let raw = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

    let mut padded = br#"{"1": 3.0}"#.to_vec();
    padded.resize(MAX_DATAGRAM_LEN, b' ');
    raw.send_to(&padded, dest).unwrap();

    let (_, value) = listener.recv().unwrap().unwrap();

    assert_eq!(value, serde_json::json!({"1": 3.0}));
}

#[test]
fn test_malformed_payload_ends_loop() {
    let mut listener = loopback_listener();
    let raw = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    raw.send_to(b"{\"1\": 3.0", listener.local_addr().unwrap())
        .unwrap();

    let stop = AtomicBool::new(false);
    let res = listener.run(&stop, |_, _| {});

    assert!(matches!(res, Err(Error::Decode(_))));
}
