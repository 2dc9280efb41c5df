//! Integration tests for the confirmed-send machine.
//!
//! Driver reports travel as `modem/*` events through the loop's queue,
//! exactly as the modem UART task would post them.

use std::cell::RefCell;
use std::rc::Rc;

use reactor_core::adapters::time::ManualClock;
use reactor_core::app::modem::{
    ConfirmedSend, ModemEvents, ModemTiming, SendFailure, SendOutcome, SendState,
};
use reactor_core::app::ports::ModemError;
use reactor_core::config::MachineConfig;
use reactor_core::{Event, EventLoop, EventType};

use crate::mock_hw::{MockModem, manual_loop, settle};

fn timing() -> ModemTiming {
    ModemTiming {
        chunk_size: 4,
        accept_timeout_ms: 100,
        transmit_timeout_ms: 200,
        confirm_timeout_ms: 300,
        retry_delay_ms: 50,
        max_attempts: 3,
    }
}

struct Rig {
    lp: EventLoop,
    clock: ManualClock,
    modem: MockModem,
    send: ConfirmedSend<MockModem>,
    events: ModemEvents,
    outcomes: Rc<RefCell<Vec<SendOutcome>>>,
}

impl Rig {
    fn new() -> Self {
        let (lp, clock) = manual_loop();
        let modem = MockModem::default();
        let send = ConfirmedSend::new(
            lp.scheduler(),
            MachineConfig::default(),
            timing(),
            modem.clone(),
        )
        .unwrap();
        let outcomes = Rc::new(RefCell::new(Vec::new()));
        let o = Rc::clone(&outcomes);
        send.on_outcome(move |outcome| o.borrow_mut().push(outcome));
        send.bind(lp.dispatcher());
        send.start().unwrap();
        Self {
            lp,
            clock,
            modem,
            send,
            events: ModemEvents::register(),
            outcomes,
        }
    }

    fn report(&self, ty: EventType) {
        assert!(self.lp.sender().post_event(Event::new(ty)));
        settle(&self.lp);
    }

    fn advance(&self, ms: u64) {
        self.clock.advance_millis(ms);
        settle(&self.lp);
    }

    fn deliver_chunk(&self) {
        self.report(self.events.accepted);
        self.report(self.events.transmitted);
    }
}

#[test]
fn buffer_is_chunked_and_confirmed() {
    let rig = Rig::new();
    rig.send.send(b"abcdef".to_vec()).unwrap();
    assert_eq!(rig.send.state(), Some(SendState::AwaitAccept));

    rig.deliver_chunk();
    assert_eq!(rig.send.state(), Some(SendState::AwaitAccept));
    rig.deliver_chunk();
    assert_eq!(rig.send.state(), Some(SendState::AwaitConfirm));
    assert_eq!(rig.modem.chunks(), vec![b"abcd".to_vec(), b"ef".to_vec()]);

    rig.report(rig.events.confirmed);
    assert_eq!(rig.send.state(), Some(SendState::Idle));
    assert_eq!(
        *rig.outcomes.borrow(),
        vec![SendOutcome::Delivered { attempts: 1 }]
    );
    assert_eq!(rig.modem.aborts(), 0);
}

#[test]
fn transmit_timeout_retries_whole_buffer() {
    let rig = Rig::new();
    rig.send.send(b"xyz".to_vec()).unwrap();
    rig.report(rig.events.accepted);
    assert_eq!(rig.send.state(), Some(SendState::AwaitTransmit));

    rig.advance(200);
    assert_eq!(rig.send.state(), Some(SendState::RetryWait));
    assert_eq!(rig.modem.aborts(), 1);

    // The radio finally reports the aborted chunk: ignored.
    rig.report(rig.events.transmitted);
    assert_eq!(rig.send.state(), Some(SendState::RetryWait));

    rig.advance(50);
    assert_eq!(rig.send.state(), Some(SendState::AwaitAccept));
    rig.deliver_chunk();
    rig.report(rig.events.confirmed);

    assert_eq!(rig.modem.chunks(), vec![b"xyz".to_vec(), b"xyz".to_vec()]);
    assert_eq!(
        *rig.outcomes.borrow(),
        vec![SendOutcome::Delivered { attempts: 2 }]
    );
}

#[test]
fn refused_chunks_exhaust_attempts() {
    let rig = Rig::new();
    rig.modem.refuse.set(Some(ModemError::Offline));
    rig.send.send(b"data".to_vec()).unwrap();
    assert_eq!(rig.send.state(), Some(SendState::RetryWait));

    rig.advance(50);
    rig.advance(50);
    assert_eq!(rig.send.state(), Some(SendState::Idle));
    assert_eq!(
        *rig.outcomes.borrow(),
        vec![SendOutcome::Failed {
            reason: SendFailure::Refused,
            attempts: 3
        }]
    );
    assert_eq!(rig.modem.aborts(), 3);
    assert!(rig.modem.chunks().is_empty());
}

#[test]
fn confirm_timeout_then_rejection_reports_last_reason() {
    let rig = Rig::new();
    rig.send.send(b"ab".to_vec()).unwrap();
    rig.deliver_chunk();
    rig.advance(300);
    assert_eq!(rig.send.state(), Some(SendState::RetryWait));

    rig.advance(50);
    rig.report(rig.events.rejected);
    rig.advance(50);
    rig.advance(100);
    assert_eq!(
        rig.send.last_outcome(),
        Some(SendOutcome::Failed {
            reason: SendFailure::AcceptTimeout,
            attempts: 3
        })
    );
    assert_eq!(rig.outcomes.borrow().len(), 1);
}

#[test]
fn second_buffer_waits_for_the_first() {
    let rig = Rig::new();
    rig.send.send(b"one".to_vec()).unwrap();
    rig.send.send(b"two".to_vec()).unwrap();
    assert_eq!(rig.send.queued(), 1);
    assert_eq!(rig.send.machine().status().pending_for_state, 0);

    rig.deliver_chunk();
    rig.report(rig.events.confirmed);
    assert_eq!(rig.send.state(), Some(SendState::AwaitAccept));
    assert_eq!(rig.send.queued(), 0);

    rig.deliver_chunk();
    rig.report(rig.events.confirmed);
    assert_eq!(rig.modem.chunks(), vec![b"one".to_vec(), b"two".to_vec()]);
    assert_eq!(rig.outcomes.borrow().len(), 2);
    assert_eq!(rig.send.state(), Some(SendState::Idle));
}

#[test]
fn stray_report_in_idle_is_ignored() {
    let rig = Rig::new();
    rig.report(rig.events.confirmed);
    assert_eq!(rig.send.state(), Some(SendState::Idle));
    assert!(!rig.send.machine().is_halted());
    assert_eq!(rig.lp.stats().unprocessed, 0);
}
