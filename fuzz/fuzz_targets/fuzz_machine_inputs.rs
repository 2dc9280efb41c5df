//! Fuzz target: `Machine` driven by arbitrary operation scripts
//!
//! Each byte selects one operation on a four-state machine: an input that
//! moves to a state, an input that stays, a parked input for a state, a
//! delayed input, a state timeout, or advancing the manual clock.
//! Invariants checked:
//! - No panics, whatever the order of operations
//! - Every parked input is seen at most once, and only in its state
//! - The pending list never exceeds its capacity
//!
//! cargo fuzz run fuzz_machine_inputs

#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use reactor_core::adapters::time::ManualClock;
use reactor_core::config::{LoopConfig, MAX_PENDING_INPUTS};
use reactor_core::fsm::{InputTable, StateTable, Symbol};
use reactor_core::{Behavior, Controls, EventLoop, Input, Machine, Transition};

struct Fuzzed {
    states: [Symbol; 4],
    moves: [Symbol; 4],
    parked: [Symbol; 4],
    seen: Rc<RefCell<Vec<(Symbol, Symbol)>>>,
}

impl Behavior for Fuzzed {
    type State = Symbol;
    type Input = Symbol;

    fn handle(
        &mut self,
        _ctl: &Controls<'_, Self>,
        state: Symbol,
        input: Input<Symbol>,
    ) -> Transition<Symbol> {
        let Input::Custom(i) = input else {
            return Transition::Stay;
        };
        if let Some(k) = self.moves.iter().position(|m| *m == i) {
            return Transition::to_with_timeout(self.states[k], 5);
        }
        if self.parked.contains(&i) {
            self.seen.borrow_mut().push((state, i));
        }
        Transition::Stay
    }
}

fuzz_target!(|data: &[u8]| {
    let clock = ManualClock::new();
    let Ok(lp) = EventLoop::with_clock(LoopConfig::default(), clock.clone()) else {
        return;
    };
    let mut st = StateTable::new();
    let mut it = InputTable::new();
    let states = ["A", "B", "C", "D"].map(|n| st.next_state(n));
    let moves = ["TO_A", "TO_B", "TO_C", "TO_D"].map(|n| it.next_input(n));
    let parked = ["P_A", "P_B", "P_C", "P_D"].map(|n| it.next_input(n));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let machine = Machine::new(
        "fuzz",
        lp.scheduler(),
        lp.config().machine.clone(),
        Fuzzed {
            states,
            moves,
            parked,
            seen: Rc::clone(&seen),
        },
    );
    if machine.start(states[0]).is_err() {
        return;
    }

    let mut accepted_parks = 0usize;
    for byte in data {
        let k = usize::from(byte & 0x03);
        match byte >> 2 {
            0..=15 => {
                let _ = machine.handle_input(moves[k]);
            }
            16..=31 => {
                if machine.queue_input_for_state(parked[k], states[k]).is_ok() {
                    accepted_parks += 1;
                }
            }
            32..=39 => machine.queue_input(moves[k], u32::from(byte & 0x0f)),
            40..=47 => machine.set_state_timeout(u32::from(byte & 0x1f)),
            _ => clock.advance_millis(u64::from(byte & 0x0f)),
        }
        lp.run_once(0);
        assert!(machine.status().pending_for_state <= MAX_PENDING_INPUTS);
    }

    let seen = seen.borrow();
    assert!(seen.len() <= accepted_parks);
    for (state, input) in seen.iter() {
        let k = parked.iter().position(|p| p == input).unwrap_or(usize::MAX);
        assert_eq!(Some(state), states.get(k));
    }
});
