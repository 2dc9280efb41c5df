//! Integration tests for registry → queue → dispatcher on one loop.
//!
//! Everything runs on the test thread (the loop owner) with a manual
//! clock, so ordering and timer interleaving are deterministic.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reactor_core::registry;
use reactor_core::{Envelope, Event, EventType, Payload, Timer};

use crate::mock_hw::{manual_loop, settle};

// ── Registry ──────────────────────────────────────────────────

#[test]
fn registry_names_round_trip_through_types() {
    let ty = registry::event_type("it_sensor", "overheat");
    assert!(ty.is_found());
    assert_eq!(registry::event_type("it_sensor", "overheat"), ty);
    assert_eq!(registry::find_event_type("it_sensor", "overheat"), ty);
    assert_eq!(registry::class_name(ty), "it_sensor");
    assert_eq!(registry::event_name(ty), "overheat");
    assert_eq!(ty.to_string(), "it_sensor/overheat");

    let class = registry::find_class_type("it_sensor");
    assert!(class.is_class_wildcard());
    assert!(class.matches(ty));
    assert_eq!(class.to_string(), "it_sensor/*");
    assert!(registry::global().class_count() >= 1);
}

#[test]
fn lookups_do_not_create_entries() {
    assert_eq!(
        registry::find_class_type("it_never_registered"),
        EventType::NOT_FOUND
    );
    assert_eq!(
        registry::find_event_type("it_never_registered", "x"),
        EventType::NOT_FOUND
    );
    assert_eq!(
        registry::find_class_type("it_never_registered"),
        EventType::NOT_FOUND
    );
    let _ = registry::class_type("it_half");
    assert_eq!(
        registry::find_event_type("it_half", "missing"),
        EventType::NOT_FOUND
    );
}

// ── Dispatch through the queue ────────────────────────────────

#[test]
fn class_handler_sees_every_event_of_its_class() {
    let (lp, _clock) = manual_loop();
    let a = registry::event_type("it_door", "open");
    let b = registry::event_type("it_door", "closed");
    let other = registry::event_type("it_window", "open");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    lp.dispatcher().on_class(a, move |e| {
        s.borrow_mut().push(registry::event_name(e.event_type()));
        true
    });

    let tx = lp.sender();
    assert!(tx.post_event(Event::new(a)));
    assert!(tx.post_event(Event::new(other)));
    assert!(tx.post_event(Event::new(b)));
    settle(&lp);

    assert_eq!(*seen.borrow(), vec!["open".to_string(), "closed".to_string()]);
    let stats = lp.stats();
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.unprocessed, 1);
}

#[test]
fn first_accepting_handler_ends_the_scan() {
    let (lp, _clock) = manual_loop();
    let ty = registry::event_type("it_scan", "ping");
    let order = Rc::new(RefCell::new(Vec::new()));

    for (tag, accept) in [("decline", false), ("accept", true), ("late", true)] {
        let o = Rc::clone(&order);
        lp.on_event(ty, move |_| {
            o.borrow_mut().push(tag);
            accept
        });
    }
    assert!(lp.dispatcher().call(Event::new(ty)));
    assert_eq!(*order.borrow(), vec!["decline", "accept"]);
}

#[test]
fn removed_handler_no_longer_matches() {
    let (lp, _clock) = manual_loop();
    let ty = registry::event_type("it_remove", "tick");
    let id = lp.on_event(ty, |_| true);
    assert!(lp.dispatcher().call(Event::new(ty)));
    assert!(lp.dispatcher().remove(id));
    assert!(!lp.dispatcher().remove(id));
    assert!(!lp.dispatcher().call(Event::new(ty)));
}

#[test]
fn payload_reaches_finalizer_by_value() {
    let (lp, _clock) = manual_loop();
    let ty = registry::event_type("it_payload", "blob");
    lp.on_event(ty, |e| e.as_bytes().is_some_and(|b| b.len() == 3));

    let returned = Arc::new(std::sync::Mutex::new(None));
    let r = Arc::clone(&returned);
    let processed = Arc::new(AtomicBool::new(false));
    let p = Arc::clone(&processed);
    lp.sender().post(
        Envelope::new(Event::bytes(ty, vec![1, 2, 3]))
            .on_process(move |_, ok| p.store(ok, Ordering::SeqCst))
            .finalizer(move |event| {
                if let Payload::Bytes(data) = event.into_payload() {
                    *r.lock().unwrap() = Some(data);
                }
            }),
    );
    settle(&lp);

    assert!(processed.load(Ordering::SeqCst));
    assert_eq!(*returned.lock().unwrap(), Some(vec![1, 2, 3]));
}

#[test]
fn handler_can_process_nested_event_immediately() {
    let (lp, _clock) = manual_loop();
    let outer = registry::event_type("it_nest", "outer");
    let inner = registry::event_type("it_nest", "inner");
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = Rc::clone(&order);
    lp.on_event(inner, move |_| {
        o.borrow_mut().push("inner");
        true
    });
    let o = Rc::clone(&order);
    let dispatcher = lp.dispatcher().clone();
    lp.on_event(outer, move |_| {
        o.borrow_mut().push("outer:begin");
        let ok = dispatcher.call(Event::new(inner));
        o.borrow_mut().push("outer:end");
        ok
    });

    lp.sender().post_event(Event::new(outer));
    settle(&lp);
    assert_eq!(*order.borrow(), vec!["outer:begin", "inner", "outer:end"]);
}

// ── Timers and events on one loop ─────────────────────────────

#[test]
fn due_timer_runs_before_queued_events() {
    let (lp, clock) = manual_loop();
    let ty = registry::event_type("it_order", "event");
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = Rc::clone(&order);
    lp.on_event(ty, move |_| {
        o.borrow_mut().push("event");
        true
    });
    let timer = Timer::new(lp.scheduler());
    let o = Rc::clone(&order);
    timer.set_timeout(5_000, move || o.borrow_mut().push("timer"));

    lp.sender().post_event(Event::new(ty));
    clock.advance_millis(5);
    let outcome = lp.run_once(0);

    assert!(outcome.timers_ran);
    assert_eq!(outcome.events, 1);
    assert_eq!(*order.borrow(), vec!["timer", "event"]);
}

#[test]
fn bounded_periodic_timer_stops_after_its_iterations() {
    let (lp, clock) = manual_loop();
    let timer = Rc::new(Timer::new(lp.scheduler()));
    let runs = Rc::new(RefCell::new(Vec::new()));

    let r = Rc::clone(&runs);
    let handle = Rc::downgrade(&timer);
    timer.set_iterations(1_000, 3, move || {
        let last = handle.upgrade().is_some_and(|t| t.is_last_iteration());
        r.borrow_mut().push(last);
    });

    for _ in 0..5 {
        clock.advance_millis(1);
        lp.run_once(0);
    }
    assert_eq!(*runs.borrow(), vec![false, false, true]);
    assert!(!timer.is_active());
}
