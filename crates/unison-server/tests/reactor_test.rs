//! End-to-end reactor tests over loopback.
//!
//! Devices are plain non-blocking `std` sockets in the same thread; the test
//! drives [`Reactor::turn`] until the expected state is reached or a deadline
//! passes.

use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpStream},
    time::{Duration, Instant},
};

use unison_core::{BroadcastConfig, Color, Mode};
use unison_server::{Reactor, ReactorConfig, listener};

const DEADLINE: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(10);

struct Device {
    stream: TcpStream,
    received: Vec<u8>,
    closed: bool,
}

impl Device {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_nonblocking(true).unwrap();
        stream.set_nodelay(true).unwrap();
        Self { stream, received: Vec::new(), closed: false }
    }

    fn drain(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    return;
                },
                Ok(n) => self.received.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) => panic!("device read failed: {err}"),
            }
        }
    }

    fn propose(&mut self, color: u8) {
        self.stream.write_all(&[color]).unwrap();
    }

    fn last(&self) -> Option<u8> {
        self.received.last().copied()
    }

    fn count(&self, color: u8) -> usize {
        self.received.iter().filter(|&&b| b == color).count()
    }
}

fn reactor() -> Reactor {
    let listener = listener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    Reactor::new(listener, &ReactorConfig::default(), BroadcastConfig::default()).unwrap()
}

fn pump_until(reactor: &mut Reactor, mut done: impl FnMut(&Reactor) -> bool) {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        reactor.turn(Some(TICK)).unwrap();
        if done(reactor) {
            return;
        }
    }
    panic!("condition not reached: {reactor:?}");
}

fn receiving(reactor: &Reactor, connections: usize) -> bool {
    let b = reactor.broadcaster();
    b.mode() == Mode::Receiving && b.connection_count() == connections
}

#[test]
fn lone_device_receives_initial_color() {
    let mut reactor = reactor();
    let mut a = Device::connect(reactor.local_addr().unwrap());

    pump_until(&mut reactor, |r| {
        a.drain();
        a.last() == Some(1) && receiving(r, 1)
    });

    assert_eq!(a.received, vec![1]);
    assert_eq!(reactor.broadcaster().rounds_completed(), 1);
}

#[test]
fn proposal_reaches_every_device_once() {
    let mut reactor = reactor();
    let addr = reactor.local_addr().unwrap();
    let mut a = Device::connect(addr);
    let mut b = Device::connect(addr);

    pump_until(&mut reactor, |r| {
        a.drain();
        b.drain();
        !b.received.is_empty() && receiving(r, 2)
    });

    a.propose(3);
    pump_until(&mut reactor, |r| {
        a.drain();
        b.drain();
        a.last() == Some(3) && b.last() == Some(3) && receiving(r, 2)
    });

    assert_eq!(a.count(3), 1);
    assert_eq!(b.count(3), 1);
    assert_eq!(reactor.broadcaster().color(), Color::new(3));
}

#[test]
fn zero_is_broadcast_unmodified() {
    let mut reactor = reactor();
    let mut a = Device::connect(reactor.local_addr().unwrap());

    pump_until(&mut reactor, |r| {
        a.drain();
        receiving(r, 1) && r.broadcaster().rounds_completed() == 1
    });

    a.propose(0);
    pump_until(&mut reactor, |r| {
        a.drain();
        receiving(r, 1) && r.broadcaster().rounds_completed() == 2
    });

    assert_eq!(a.received, vec![1, 0]);
    assert_eq!(reactor.broadcaster().color(), Color::new(0));
}

#[test]
fn departed_device_is_removed_and_round_continues() {
    let mut reactor = reactor();
    let addr = reactor.local_addr().unwrap();
    let mut a = Device::connect(addr);
    let mut b = Device::connect(addr);

    pump_until(&mut reactor, |r| {
        a.drain();
        b.drain();
        !b.received.is_empty() && receiving(r, 2)
    });

    drop(b);
    pump_until(&mut reactor, |r| r.broadcaster().connection_count() == 1);

    a.propose(5);
    pump_until(&mut reactor, |r| {
        a.drain();
        a.last() == Some(5) && receiving(r, 1)
    });

    assert!(!a.closed);
    assert_eq!(a.count(5), 1);
}

#[test]
fn late_joiner_resyncs_existing_devices() {
    let mut reactor = reactor();
    let addr = reactor.local_addr().unwrap();
    let mut a = Device::connect(addr);

    pump_until(&mut reactor, |r| {
        a.drain();
        receiving(r, 1) && r.broadcaster().rounds_completed() == 1
    });

    a.propose(6);
    pump_until(&mut reactor, |r| {
        a.drain();
        a.last() == Some(6) && receiving(r, 1)
    });

    let mut c = Device::connect(addr);
    pump_until(&mut reactor, |r| {
        a.drain();
        c.drain();
        c.last() == Some(6) && a.count(6) == 2 && receiving(r, 2)
    });

    assert_eq!(c.received, vec![6]);
    assert_eq!(reactor.broadcaster().color(), Color::new(6));
}

#[test]
fn queued_proposals_in_one_segment_each_get_a_round() {
    let mut reactor = reactor();
    let mut a = Device::connect(reactor.local_addr().unwrap());

    pump_until(&mut reactor, |r| {
        a.drain();
        a.last() == Some(1) && receiving(r, 1)
    });

    a.stream.write_all(&[3, 5]).unwrap();
    pump_until(&mut reactor, |r| {
        a.drain();
        a.last() == Some(5) && receiving(r, 1)
    });

    assert_eq!(a.received, vec![1, 3, 5]);
    assert_eq!(reactor.broadcaster().color(), Color::new(5));
    assert_eq!(reactor.broadcaster().rounds_completed(), 3);
}

#[test]
fn simultaneous_proposals_with_departure_converge() {
    let mut reactor = reactor();
    let addr = reactor.local_addr().unwrap();
    let mut a = Device::connect(addr);
    let mut b = Device::connect(addr);
    let mut c = Device::connect(addr);

    pump_until(&mut reactor, |r| {
        a.drain();
        b.drain();
        c.drain();
        [&a, &b, &c].iter().all(|d| !d.received.is_empty()) && receiving(r, 3)
    });

    a.propose(2);
    b.propose(4);
    drop(c);
    pump_until(&mut reactor, |r| {
        a.drain();
        b.drain();
        [&a, &b].iter().all(|d| d.count(2) == 1 && d.count(4) == 1) && receiving(r, 2)
    });

    let proposals =
        |d: &Device| d.received.iter().copied().filter(|&byte| byte != 1).collect::<Vec<_>>();
    assert_eq!(proposals(&a), proposals(&b));
    assert_eq!(a.last(), b.last());
    assert_eq!(a.last().map(Color::new), Some(reactor.broadcaster().color()));
    assert!(!a.closed && !b.closed);
}
