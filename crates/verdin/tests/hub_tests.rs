//! Integration tests for hub scheduling order, delayed spawns, explicit
//! hubs, and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use verdin::Hub;

#[test]
fn test_spawned_bodies_run_in_spawn_order() {
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    for tag in 1..=4 {
        let order = order.clone();
        verdin::spawn(move || order.lock().push(tag));
    }

    verdin::sleep(Duration::ZERO);
    assert_eq!(*order.lock(), vec![1, 2, 3, 4]);
}

#[test]
fn test_spawn_after_runs_after_the_delay() {
    let start = Instant::now();
    let green = verdin::spawn_after(Duration::from_millis(40), || 9u32);

    assert_eq!(green.wait().unwrap(), 9);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_spawn_after_can_be_cancelled_within_the_delay() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let green = verdin::spawn_after(Duration::from_millis(50), move || {
        flag.store(true, Ordering::SeqCst);
        1u32
    });

    green.cancel();
    assert!(green.wait().unwrap_err().is_terminated());

    // Outlive the original delay; the launch job must stay dead.
    verdin::sleep(Duration::from_millis(80));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!green.has_started());
}

#[test]
fn test_spawn_after_outlives_the_spawning_green_thread() {
    let outer = verdin::spawn(|| verdin::spawn_after(Duration::from_millis(20), || 3u32));
    let inner = outer.wait().unwrap();
    assert_eq!(inner.wait().unwrap(), 3);
}

#[test]
fn test_timers_fire_in_deadline_order() {
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let late = order.clone();
    verdin::spawn_after(Duration::from_millis(60), move || late.lock().push(2));
    let early = order.clone();
    verdin::spawn_after(Duration::from_millis(20), move || early.lock().push(1));

    verdin::sleep(Duration::from_millis(100));
    assert_eq!(*order.lock(), vec![1, 2]);
}

#[test]
fn test_explicit_hub_runs_work_for_a_foreign_thread() {
    let hub = Hub::new();
    let green = hub.spawn(|| {
        verdin::sleep(Duration::from_millis(10));
        11u32
    });

    // This thread is bound to its own hub; the wait crosses domains.
    assert_eq!(green.wait().unwrap(), 11);
    hub.shutdown();
}

#[test]
#[should_panic(expected = "already bound to a different hub")]
fn test_termination_across_hubs_is_rejected() {
    let hub = Hub::new();
    let green = hub.spawn(|| -> u32 {
        loop {
            verdin::sleep(Duration::from_millis(5));
        }
    });

    // Bind this thread to its own hub first.
    verdin::sleep(Duration::ZERO);
    green.kill();
}

#[test]
fn test_handle_reports_its_hub() {
    let hub = Hub::new();
    let green = hub.spawn(|| 1u32);
    let _ = green.hub();
    assert_eq!(green.wait().unwrap(), 1);
    hub.shutdown();
}

#[test]
fn test_green_ids_are_unique() {
    let a = verdin::spawn(|| 0u32);
    let b = verdin::spawn(|| 0u32);
    assert_ne!(a.id(), b.id());
    a.wait().unwrap();
    b.wait().unwrap();
}

#[test]
fn test_shutdown_returns_promptly() {
    let hub = Hub::new();
    let green = hub.spawn(|| 5u32);
    assert_eq!(green.wait().unwrap(), 5);

    let start = Instant::now();
    hub.shutdown();
    assert!(start.elapsed() < Duration::from_secs(1));
}
