//! Integration tests for machines running on an event loop.
//!
//! States and inputs come from `StateTable` / `InputTable`, the way a
//! subsystem without its own enums declares them.  Each machine's
//! handler is a closure so every test spells out its transition table
//! next to the assertions.

use std::cell::RefCell;
use std::rc::Rc;

use reactor_core::config::MachineConfig;
use reactor_core::diagnostics;
use reactor_core::fsm::{InputTable, StateTable, Symbol, WeakMachine};
use reactor_core::registry;
use reactor_core::{
    Behavior, Controls, Event, EventLoop, EventSender, Input, Machine, Transition,
};

use crate::mock_hw::{manual_loop, settle};

type Rule = Box<dyn FnMut(&Controls<'_, Scripted>, Symbol, Input<Symbol>) -> Transition<Symbol>>;

struct Scripted {
    rule: Rule,
}

impl Behavior for Scripted {
    type State = Symbol;
    type Input = Symbol;

    fn handle(
        &mut self,
        ctl: &Controls<'_, Self>,
        state: Symbol,
        input: Input<Symbol>,
    ) -> Transition<Symbol> {
        (self.rule)(ctl, state, input)
    }
}

fn scripted(
    name: &'static str,
    lp: &EventLoop,
    rule: impl FnMut(&Controls<'_, Scripted>, Symbol, Input<Symbol>) -> Transition<Symbol> + 'static,
) -> Machine<Scripted> {
    Machine::new(
        name,
        lp.scheduler(),
        MachineConfig::default(),
        Scripted {
            rule: Box::new(rule),
        },
    )
}

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

// ── State timeout ─────────────────────────────────────────────

#[test]
fn re_entering_with_shorter_timeout_replaces_the_pending_one() {
    let (lp, clock) = manual_loop();
    let mut states = StateTable::new();
    let mut inputs = InputTable::new();
    let idle = states.next_state("IDLE");
    let rearm = inputs.next_input("REARM");

    let fired = Rc::new(RefCell::new(Vec::new()));
    let f = Rc::clone(&fired);
    let m = scripted("timeouts", &lp, move |ctl, state, input| match input {
        Input::Enter => Transition::Stay,
        Input::Timeout => {
            f.borrow_mut().push((state, ctl.now_micros() / 1_000));
            Transition::Stay
        }
        Input::Custom(i) if i == rearm => Transition::to_with_timeout(idle, 50),
        Input::Custom(_) => Transition::Violation,
    });
    m.start(idle).unwrap();
    m.set_state_timeout(100);

    clock.advance_millis(30);
    lp.run_once(0);
    m.handle_input(rearm).unwrap();
    assert_eq!(m.timeout_remaining(), Some(50));

    clock.set_micros(79_000);
    lp.run_once(0);
    assert!(fired.borrow().is_empty());

    clock.set_micros(80_000);
    lp.run_once(0);
    clock.set_micros(200_000);
    lp.run_once(0);
    assert_eq!(*fired.borrow(), vec![(idle, 80)]);
    assert_eq!(m.timeout_remaining(), None);
    assert_eq!(states.name(idle.id()), "IDLE");
}

// ── Queued inputs ─────────────────────────────────────────────

#[test]
fn zero_delay_queued_input_runs_on_a_later_loop_turn() {
    let (lp, _clock) = manual_loop();
    let mut states = StateTable::new();
    let mut inputs = InputTable::new();
    let ready = states.next_state("READY");
    let kick = inputs.next_input("KICK");
    let tick = inputs.next_input("TICK");

    let trace = log();
    let t = Rc::clone(&trace);
    let m = scripted("queued", &lp, move |ctl, _, input| {
        match input {
            Input::Custom(i) if i == kick => {
                ctl.queue_input(tick, 0);
                t.borrow_mut().push("kick".into());
            }
            Input::Custom(i) if i == tick => t.borrow_mut().push("tick".into()),
            _ => {}
        }
        Transition::Stay
    });
    m.start(ready).unwrap();

    m.handle_input(kick).unwrap();
    assert_eq!(*trace.borrow(), vec!["kick"]);
    assert_eq!(m.status().queued, 1);

    settle(&lp);
    assert_eq!(*trace.borrow(), vec!["kick", "tick"]);
    assert_eq!(m.status().queued, 0);
}

#[test]
fn inputs_parked_for_a_state_drain_in_order_until_one_moves_on() {
    let (lp, _clock) = manual_loop();
    let mut states = StateTable::new();
    let mut inputs = InputTable::new();
    let busy = states.next_state("BUSY");
    let idle = states.next_state("IDLE");
    let done = states.next_state("DONE");
    let finish = inputs.next_input("FINISH");
    let job = inputs.next_input("JOB");
    let stop = inputs.next_input("STOP");
    let back = inputs.next_input("BACK");

    let trace = log();
    let t = Rc::clone(&trace);
    let m = scripted("parked", &lp, move |_, state, input| match (input, state) {
        (Input::Enter, _) => Transition::Stay,
        (Input::Custom(i), s) if i == finish && s == busy => Transition::to(idle),
        (Input::Custom(i), s) if s == idle && (i == job || i == stop) => {
            t.borrow_mut().push(i.to_string());
            if i == stop { Transition::to(done) } else { Transition::Stay }
        }
        (Input::Custom(i), s) if i == back && s == done => Transition::to(idle),
        _ => Transition::Violation,
    });
    m.start(busy).unwrap();

    for i in [job, stop, job] {
        m.queue_input_for_state(i, idle).unwrap();
    }
    assert_eq!(m.status().pending_for_state, 3);

    m.handle_input(finish).unwrap();
    assert_eq!(m.current_state(), Some(done));
    assert_eq!(*trace.borrow(), vec!["JOB", "STOP"]);

    m.handle_input(back).unwrap();
    assert_eq!(m.current_state(), Some(idle));
    assert_eq!(*trace.borrow(), vec!["JOB", "STOP", "JOB"]);
    assert_eq!(m.status().pending_for_state, 0);
}

// ── Machines wired through the loop ───────────────────────────

#[test]
fn machine_event_reaches_bound_machine_through_the_queue() {
    let (lp, _clock) = manual_loop();
    let mut states = StateTable::new();
    let mut inputs = InputTable::new();
    let working = states.next_state("WORKING");
    let finished = states.next_state("FINISHED");
    let waiting = states.next_state("WAITING");
    let go = inputs.next_input("GO");
    let peer_done = inputs.next_input("PEER_DONE");
    let done_ty = registry::event_type("it_fsm", "done");

    let tx: EventSender = lp.sender();
    let producer = scripted("producer", &lp, move |_, state, input| match input {
        Input::Enter if state == finished => {
            tx.post_event(Event::new(done_ty));
            Transition::Stay
        }
        Input::Enter => Transition::Stay,
        Input::Custom(i) if i == go => Transition::to(finished),
        _ => Transition::Violation,
    });
    let consumer = scripted("consumer", &lp, move |_, state, input| match input {
        Input::Enter => Transition::Stay,
        Input::Custom(i) if i == peer_done && state == waiting => Transition::to(finished),
        _ => Transition::Violation,
    });
    producer.start(working).unwrap();
    consumer.start(waiting).unwrap();

    let c = consumer.clone();
    lp.on_event(done_ty, move |_| c.handle_input(peer_done).is_ok());

    producer.handle_input(go).unwrap();
    assert_eq!(consumer.current_state(), Some(waiting));
    settle(&lp);
    assert_eq!(consumer.current_state(), Some(finished));
    assert_eq!(lp.stats().unprocessed, 0);
}

#[test]
fn machines_feeding_each_other_do_not_recurse() {
    let (lp, _clock) = manual_loop();
    let mut states = StateTable::new();
    let mut inputs = InputTable::new();
    let run = states.next_state("RUN");
    let ping = inputs.next_input("PING");
    let pong = inputs.next_input("PONG");

    let trace = log();
    let peer: Rc<RefCell<Option<WeakMachine<Scripted>>>> = Rc::new(RefCell::new(None));

    let (t, p) = (Rc::clone(&trace), Rc::clone(&peer));
    let a = scripted("a", &lp, move |_, _, input| {
        if let Input::Custom(i) = input {
            t.borrow_mut().push(format!("a:{:?}:begin", i));
            if i == ping {
                let b = p.borrow().as_ref().and_then(WeakMachine::upgrade);
                if let Some(b) = b {
                    b.handle_input(ping).unwrap();
                }
            }
            t.borrow_mut().push(format!("a:{:?}:end", i));
        }
        Transition::Stay
    });

    let t = Rc::clone(&trace);
    let weak_a = a.downgrade();
    let b = scripted("b", &lp, move |_, _, input| {
        if let Input::Custom(i) = input {
            t.borrow_mut().push(format!("b:{:?}", i));
            if let Some(a) = weak_a.upgrade() {
                a.handle_input(pong).unwrap();
            }
        }
        Transition::Stay
    });
    *peer.borrow_mut() = Some(b.downgrade());

    a.start(run).unwrap();
    b.start(run).unwrap();
    a.handle_input(ping).unwrap();

    assert_eq!(
        *trace.borrow(),
        vec![
            "a:PING#0:begin",
            "b:PING#0",
            "a:PING#0:end",
            "a:PONG#1:begin",
            "a:PONG#1:end",
        ]
    );
}

// ── Status reporting ──────────────────────────────────────────

#[test]
fn status_line_reports_state_timeout_and_pending() {
    let (lp, clock) = manual_loop();
    let mut states = StateTable::new();
    let mut inputs = InputTable::new();
    let armed = states.next_state("ARMED");
    let later = states.next_state("LATER");
    let poke = inputs.next_input("POKE");

    let m = scripted("alarm", &lp, |_, _, _| Transition::Stay);
    assert_eq!(m.state_name(), "-");
    m.start(armed).unwrap();
    m.set_state_timeout(500);
    m.queue_input_for_state(poke, later).unwrap();
    clock.advance_millis(120);

    let line = diagnostics::machine_line(&m.status());
    assert_eq!(line.as_str(), "alarm: ARMED 120ms timeout 380ms pending=1");
    assert_eq!(Machine::<Scripted>::input_name(&Input::Custom(poke)), "POKE");
    assert_eq!(Machine::<Scripted>::input_name(&Input::Timeout), "TIMEOUT");
}
