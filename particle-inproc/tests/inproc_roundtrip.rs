//! Integration coverage for the in-process substrate's concrete scenarios
//! (round trip, ordering, broadcast, and attaching before the reactor has
//! started).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use particle_core::endpoint::{Particle, Reactor};
use particle_core::error::ParticleError;
use particle_core::event::Event;
use particle_inproc::{InprocParticle, InprocReactor, InprocRegistry};

fn wait_until(deadline_secs: u64, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(deadline_secs);
    while !cond() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn ping_pong_round_trip() {
    let registry = InprocRegistry::new();
    let server_saw: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let server_saw_clone = Arc::clone(&server_saw);

    let reactor = InprocReactor::new(
        &registry,
        "base",
        Arc::new(move |event: Event<'_>| {
            if let Event::Received { view, .. } = event {
                server_saw_clone.lock().unwrap().push(view.to_vec());
            }
        }),
    );
    reactor.start().unwrap();

    let client_saw: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let client_saw_clone = Arc::clone(&client_saw);
    let client = InprocParticle::connect(
        &registry,
        "base",
        "client-1",
        Arc::new(move |event: Event<'_>| {
            if let Event::Received { view, .. } = event {
                client_saw_clone.lock().unwrap().push(view.to_vec());
            }
        }),
    )
    .unwrap();

    client.send(b"ping").unwrap();
    wait_until(3, || !server_saw.lock().unwrap().is_empty());
    assert_eq!(server_saw.lock().unwrap().as_slice(), &[b"ping".to_vec()]);

    reactor.send_to(client.id(), b"pong").unwrap();
    wait_until(3, || !client_saw.lock().unwrap().is_empty());
    assert_eq!(client_saw.lock().unwrap().as_slice(), &[b"pong".to_vec()]);

    assert_eq!(client.metrics().messages_sent, 1);
    assert_eq!(client.metrics().bytes_received, 4);
    assert_eq!(reactor.metrics().messages_received, 1);
    assert_eq!(reactor.metrics().messages_sent, 1);

    assert!(!client.is_disposed());
    client.dispose();
    reactor.dispose();
}

#[test]
fn frames_are_received_in_send_order() {
    let registry = InprocRegistry::new();
    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    let reactor = InprocReactor::new(
        &registry,
        "base",
        Arc::new(move |event: Event<'_>| {
            if let Event::Received { view, .. } = event {
                received_clone.lock().unwrap().push(view[0]);
            }
        }),
    );
    reactor.start().unwrap();

    let client = InprocParticle::connect(&registry, "base", "client-1", Arc::new(|_event: Event<'_>| {})).unwrap();

    for i in 0u8..50 {
        client.send(&[i]).unwrap();
    }

    wait_until(5, || received.lock().unwrap().len() == 50);
    let expected: Vec<u8> = (0u8..50).collect();
    assert_eq!(received.lock().unwrap().as_slice(), expected.as_slice());

    client.dispose();
    reactor.dispose();
}

#[test]
fn broadcast_reaches_every_client_with_no_cross_delivery() {
    let registry = InprocRegistry::new();
    let reactor = InprocReactor::new(&registry, "base", Arc::new(|_event: Event<'_>| {}));
    reactor.start().unwrap();

    let a_saw: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let b_saw: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let a_saw_clone = Arc::clone(&a_saw);
    let b_saw_clone = Arc::clone(&b_saw);

    let client_a = InprocParticle::connect(
        &registry,
        "base",
        "a",
        Arc::new(move |event: Event<'_>| {
            if let Event::Received { view, .. } = event {
                a_saw_clone.lock().unwrap().push(view.to_vec());
            }
        }),
    )
    .unwrap();
    let client_b = InprocParticle::connect(
        &registry,
        "base",
        "b",
        Arc::new(move |event: Event<'_>| {
            if let Event::Received { view, .. } = event {
                b_saw_clone.lock().unwrap().push(view.to_vec());
            }
        }),
    )
    .unwrap();

    reactor.broadcast(b"hello-all");

    wait_until(5, || !a_saw.lock().unwrap().is_empty() && !b_saw.lock().unwrap().is_empty());
    assert_eq!(a_saw.lock().unwrap().as_slice(), &[b"hello-all".to_vec()]);
    assert_eq!(b_saw.lock().unwrap().as_slice(), &[b"hello-all".to_vec()]);

    client_a.dispose();
    client_b.dispose();
    reactor.dispose();
}

/// spec.md §8 scenario 6, "Reconnect": a client attempts to connect before
/// its reactor has registered, retries internally, and succeeds once the
/// reactor starts on another thread shortly after.
#[test]
fn client_retries_until_a_late_starting_reactor_registers() {
    let registry = Arc::new(InprocRegistry::new());
    let registry_clone = Arc::clone(&registry);

    let reactor_handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(15));
        let reactor = InprocReactor::new(&registry_clone, "late", Arc::new(|_event: Event<'_>| {}));
        reactor.start().unwrap();
        reactor
    });

    let client = InprocParticle::connect(&registry, "late", "eager-client", Arc::new(|_event: Event<'_>| {})).unwrap();
    client.send(b"hello").unwrap();

    let reactor = reactor_handle.join().unwrap();
    client.dispose();
    reactor.dispose();
}

#[test]
fn connecting_to_a_reactor_that_never_starts_reports_attach_timeout() {
    let registry = InprocRegistry::new();
    let result = InprocParticle::connect(&registry, "nobody-home", "c1", Arc::new(|_event: Event<'_>| {}));
    assert!(matches!(result, Err(ParticleError::AttachTimeout { .. })));
}
