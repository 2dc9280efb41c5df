//! Integration tests for command execution from console threads.
//!
//! The console runs on its own thread and blocks on each command; a
//! command handler that runs another command is already on the owner
//! thread and must not wait on the queue it is being dispatched from.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use reactor_core::app::commands::{CommandBus, on_command};
use reactor_core::config::LoopConfig;
use reactor_core::EventLoop;

fn real_loop() -> EventLoop {
    EventLoop::new(LoopConfig::default()).expect("valid config")
}

#[test]
fn console_thread_gets_each_command_outcome() {
    let lp = real_loop();
    let bus = CommandBus::new(&lp);
    let lines = Rc::new(RefCell::new(Vec::new()));
    let l = Rc::clone(&lines);
    on_command(lp.dispatcher(), "led", move |rest| {
        l.borrow_mut().push(rest.to_string());
        rest == "on" || rest == "off"
    });

    let done = Arc::new(AtomicBool::new(false));
    let d = Arc::clone(&done);
    let console = thread::spawn(move || {
        let results = ["led on", "led blink", "motor home", "led off"].map(|c| bus.execute(c));
        d.store(true, Ordering::SeqCst);
        results
    });

    lp.run_until(5, || done.load(Ordering::SeqCst));
    let results = console.join().unwrap();
    assert_eq!(results, [Ok(true), Ok(false), Ok(false), Ok(true)]);
    assert_eq!(*lines.borrow(), vec!["on", "blink", "off"]);
}

#[test]
fn command_issued_from_a_command_runs_inline() {
    let lp = real_loop();
    let bus = CommandBus::new(&lp);
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = Rc::clone(&order);
    on_command(lp.dispatcher(), "calibrate", move |_| {
        o.borrow_mut().push("calibrate");
        true
    });
    let o = Rc::clone(&order);
    let nested = bus.clone();
    on_command(lp.dispatcher(), "boot", move |_| {
        o.borrow_mut().push("boot:begin");
        let ok = nested.execute("calibrate") == Ok(true);
        o.borrow_mut().push("boot:end");
        ok
    });

    let done = Arc::new(AtomicBool::new(false));
    let d = Arc::clone(&done);
    let console = thread::spawn(move || {
        let res = bus.execute("boot");
        d.store(true, Ordering::SeqCst);
        res
    });

    lp.run_until(5, || done.load(Ordering::SeqCst));
    assert_eq!(console.join().unwrap(), Ok(true));
    assert_eq!(*order.borrow(), vec!["boot:begin", "calibrate", "boot:end"]);
}

#[test]
fn submitted_commands_run_in_order_on_the_owner() {
    let lp = real_loop();
    let bus = CommandBus::new(&lp);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    on_command(lp.dispatcher(), "log", move |rest| {
        s.borrow_mut().push(rest.to_string());
        true
    });

    let submitter = thread::spawn(move || (1..=5).all(|i| bus.submit(&format!("log {i}"))));
    assert!(submitter.join().unwrap());

    while lp.run_once(0).events > 0 {}
    assert_eq!(*seen.borrow(), vec!["1", "2", "3", "4", "5"]);
}
