//! Power supervisor: main rail sequencing plus a load sub-flow.
//!
//! Two machines cooperate.  The main machine owns the supply rail; the
//! load machine owns the load-enable line.  Requests that arrive while a
//! machine is between quiescent states are parked with
//! `queue_input_for_state` instead of being handled out of context.
//!
//! ```text
//!  main:  OFF ──PowerOn──▶ RAMPING ──RailGood──▶ ON ──PowerOff──▶ SHUTTING_DOWN
//!          ▲                  │ timeout           │ LoadRequest ─▶ load:Enable
//!          │                  ▼                   │               │ LoadReleased
//!          └──ClearFault── FAULT ◀── timeout ─────┼───────────────┘──▶ OFF
//!
//!  load:  IDLE ──Enable──▶ ENABLING ──settle──▶ ACTIVE ──Disable──▶ DISABLING ──drain──▶ IDLE
//!                          (Disable parked        (Enable parked for IDLE while DISABLING)
//!                           for ACTIVE)
//! ```
//!
//! The load machine reports `LoadReleased` back to the main machine from
//! inside its own handler; the main machine is usually mid-handler at
//! that point and receives it right after the current input.

use embedded_hal::digital::OutputPin;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::PowerRail;
use crate::config::MachineConfig;
use crate::dispatch::{Dispatcher, HandlerId};
use crate::error::Result;
use crate::fsm::{Behavior, Controls, Input, Label, Machine, MachineStatus, Transition};
use crate::registry::{self, EventType};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerTiming {
    /// Rail must report power-good within this window (ms)
    pub ramp_timeout_ms: u32,
    /// Load must release within this window on power-down (ms)
    pub shutdown_timeout_ms: u32,
    /// Load settle time after the enable line goes high (ms)
    pub load_settle_ms: u32,
    /// Load drain time after the enable line goes low (ms)
    pub load_drain_ms: u32,
}

impl Default for PowerTiming {
    fn default() -> Self {
        Self {
            ramp_timeout_ms: 50,
            shutdown_timeout_ms: 500,
            load_settle_ms: 20,
            load_drain_ms: 10,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Load sub-flow
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Enabling,
    Active,
    Disabling,
}

impl Label for LoadState {
    fn label(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Enabling => "ENABLING",
            Self::Active => "ACTIVE",
            Self::Disabling => "DISABLING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadInput {
    Enable,
    Disable,
}

impl Label for LoadInput {
    fn label(&self) -> &'static str {
        match self {
            Self::Enable => "ENABLE",
            Self::Disable => "DISABLE",
        }
    }
}

pub struct LoadFlow<P: OutputPin> {
    pin: P,
    timing: PowerTiming,
    released: Option<Box<dyn FnMut()>>,
    pin_faults: u32,
}

impl<P: OutputPin> LoadFlow<P> {
    fn drive(&mut self, high: bool) {
        let res = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(e) = res {
            self.pin_faults += 1;
            error!("power: load enable line stuck: {:?}", e);
        }
    }

    fn release(&mut self) {
        if let Some(f) = self.released.as_mut() {
            f();
        }
    }
}

impl<P: OutputPin + 'static> Behavior for LoadFlow<P> {
    type State = LoadState;
    type Input = LoadInput;

    fn handle(
        &mut self,
        ctl: &Controls<'_, Self>,
        state: LoadState,
        input: Input<LoadInput>,
    ) -> Transition<LoadState> {
        use Input::{Custom, Enter, Timeout};
        use LoadInput as I;
        use LoadState as S;

        match (state, input) {
            (S::Idle, Enter) => {
                self.drive(false);
                Transition::Stay
            }
            (S::Idle, Custom(I::Enable)) => {
                Transition::to_with_timeout(S::Enabling, self.timing.load_settle_ms)
            }
            (S::Idle, Custom(I::Disable)) => {
                self.release();
                Transition::Stay
            }

            (S::Enabling, Enter) => {
                self.drive(true);
                Transition::Stay
            }
            (S::Enabling, Timeout) => Transition::to(S::Active),
            (S::Enabling, Custom(I::Disable)) => {
                if let Err(e) = ctl.queue_input_for_state(I::Disable, S::Active) {
                    warn!("power: disable not parked: {}", e);
                }
                Transition::Stay
            }

            (S::Active, Enter) => {
                info!("power: load active");
                Transition::Stay
            }
            (S::Active, Custom(I::Disable)) => {
                Transition::to_with_timeout(S::Disabling, self.timing.load_drain_ms)
            }

            (S::Disabling, Enter) => {
                self.drive(false);
                Transition::Stay
            }
            (S::Disabling, Timeout) => {
                self.release();
                Transition::to(S::Idle)
            }
            (S::Disabling, Custom(I::Enable)) => {
                if let Err(e) = ctl.queue_input_for_state(I::Enable, S::Idle) {
                    warn!("power: enable not parked: {}", e);
                }
                Transition::Stay
            }

            (S::Enabling | S::Active, Custom(I::Enable))
            | (S::Disabling, Custom(I::Disable)) => Transition::Stay,
            _ => Transition::Violation,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Main sequencing
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainState {
    Off,
    Ramping,
    On,
    ShuttingDown,
    Fault,
}

impl Label for MainState {
    fn label(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Ramping => "RAMPING",
            Self::On => "ON",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Fault => "FAULT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainInput {
    PowerOn,
    PowerOff,
    RailGood,
    LoadRequest,
    LoadReleased,
    ClearFault,
}

impl Label for MainInput {
    fn label(&self) -> &'static str {
        match self {
            Self::PowerOn => "POWER_ON",
            Self::PowerOff => "POWER_OFF",
            Self::RailGood => "RAIL_GOOD",
            Self::LoadRequest => "LOAD_REQUEST",
            Self::LoadReleased => "LOAD_RELEASED",
            Self::ClearFault => "CLEAR_FAULT",
        }
    }
}

pub struct MainFlow<R: PowerRail, P: OutputPin + 'static> {
    rail: R,
    timing: PowerTiming,
    load: Machine<LoadFlow<P>>,
}

impl<R: PowerRail + 'static, P: OutputPin + 'static> MainFlow<R, P> {
    fn feed_load(&self, input: LoadInput) {
        if let Err(e) = self.load.handle_input(input) {
            warn!("power: load {} failed: {}", input.label(), e);
        }
    }

    fn park(ctl: &Controls<'_, Self>, input: MainInput, state: MainState) {
        if let Err(e) = ctl.queue_input_for_state(input, state) {
            warn!("power: {} not parked: {}", input.label(), e);
        }
    }
}

impl<R: PowerRail + 'static, P: OutputPin + 'static> Behavior for MainFlow<R, P> {
    type State = MainState;
    type Input = MainInput;

    fn handle(
        &mut self,
        ctl: &Controls<'_, Self>,
        state: MainState,
        input: Input<MainInput>,
    ) -> Transition<MainState> {
        use Input::{Custom, Enter, Timeout};
        use MainInput as I;
        use MainState as S;

        match (state, input) {
            (S::Off, Enter) => {
                self.rail.set_enabled(false);
                Transition::Stay
            }
            (S::Off, Custom(I::PowerOn)) => {
                Transition::to_with_timeout(S::Ramping, self.timing.ramp_timeout_ms)
            }

            (S::Ramping, Enter) => {
                self.rail.set_enabled(true);
                if self.rail.is_good() {
                    Transition::to(S::On)
                } else {
                    Transition::Stay
                }
            }
            (S::Ramping, Custom(I::RailGood)) => Transition::to(S::On),
            (S::Ramping, Timeout) => {
                error!("power: rail not good after {}ms", self.timing.ramp_timeout_ms);
                Transition::to(S::Fault)
            }
            (S::Ramping, Custom(I::PowerOff)) => Transition::to(S::Off),

            (S::On, Enter) => {
                info!("power: rail up");
                Transition::Stay
            }
            (S::On, Custom(I::LoadRequest)) => {
                self.feed_load(LoadInput::Enable);
                Transition::Stay
            }
            (S::On, Custom(I::PowerOff)) => {
                Transition::to_with_timeout(S::ShuttingDown, self.timing.shutdown_timeout_ms)
            }

            (S::ShuttingDown, Enter) => {
                self.feed_load(LoadInput::Disable);
                Transition::Stay
            }
            (S::ShuttingDown, Custom(I::LoadReleased)) => Transition::to(S::Off),
            (S::ShuttingDown, Timeout) => {
                error!("power: load did not release");
                Transition::to(S::Fault)
            }

            // A load request before the rail is up waits for ON.
            (S::Off | S::Ramping | S::ShuttingDown | S::Fault, Custom(I::LoadRequest)) => {
                Self::park(ctl, I::LoadRequest, S::On);
                Transition::Stay
            }

            (S::Fault, Enter) => {
                self.rail.set_enabled(false);
                self.feed_load(LoadInput::Disable);
                Transition::Stay
            }
            (S::Fault, Custom(I::ClearFault)) => Transition::to(S::Off),

            (_, Custom(I::RailGood | I::LoadReleased))
            | (S::Off | S::Fault, Custom(I::PowerOff))
            | (S::On | S::Ramping, Custom(I::PowerOn)) => Transition::Stay,
            _ => Transition::Violation,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Supervisor
// ═══════════════════════════════════════════════════════════════

/// Event types the power drivers and operators post (`power/<name>`).
#[derive(Debug, Clone, Copy)]
pub struct PowerEvents {
    pub on: EventType,
    pub off: EventType,
    pub rail_good: EventType,
    pub load: EventType,
    pub clear_fault: EventType,
}

impl PowerEvents {
    pub fn register() -> Self {
        Self {
            on: registry::event_type("power", "on"),
            off: registry::event_type("power", "off"),
            rail_good: registry::event_type("power", "rail_good"),
            load: registry::event_type("power", "load"),
            clear_fault: registry::event_type("power", "clear_fault"),
        }
    }

    fn input_for(&self, ty: EventType) -> Option<MainInput> {
        match ty {
            t if t == self.on => Some(MainInput::PowerOn),
            t if t == self.off => Some(MainInput::PowerOff),
            t if t == self.rail_good => Some(MainInput::RailGood),
            t if t == self.load => Some(MainInput::LoadRequest),
            t if t == self.clear_fault => Some(MainInput::ClearFault),
            _ => None,
        }
    }
}

pub struct PowerSupervisor<R: PowerRail + 'static, P: OutputPin + 'static> {
    main: Machine<MainFlow<R, P>>,
    load: Machine<LoadFlow<P>>,
}

impl<R: PowerRail + 'static, P: OutputPin + 'static> PowerSupervisor<R, P> {
    pub fn new(
        scheduler: &Scheduler,
        config: &MachineConfig,
        timing: PowerTiming,
        rail: R,
        load_pin: P,
    ) -> Self {
        let load = Machine::new(
            "power.load",
            scheduler,
            config.clone(),
            LoadFlow {
                pin: load_pin,
                timing: timing.clone(),
                released: None,
                pin_faults: 0,
            },
        );
        let main = Machine::new(
            "power",
            scheduler,
            config.clone(),
            MainFlow {
                rail,
                timing,
                load: load.clone(),
            },
        );

        let weak_main = main.downgrade();
        let _ = load.with_behavior_mut(|flow| {
            flow.released = Some(Box::new(move || {
                if let Some(main) = weak_main.upgrade() {
                    if let Err(e) = main.handle_input(MainInput::LoadReleased) {
                        warn!("power: release not delivered: {}", e);
                    }
                }
            }));
        });

        Self { main, load }
    }

    /// Start both machines: load first, so the main machine can feed it.
    pub fn start(&self) -> Result<()> {
        self.load.start(LoadState::Idle)?;
        self.main.start(MainState::Off)
    }

    pub fn power_on(&self) -> Result<()> {
        self.main.handle_input(MainInput::PowerOn)
    }

    pub fn power_off(&self) -> Result<()> {
        self.main.handle_input(MainInput::PowerOff)
    }

    pub fn rail_good(&self) -> Result<()> {
        self.main.handle_input(MainInput::RailGood)
    }

    pub fn request_load(&self) -> Result<()> {
        self.main.handle_input(MainInput::LoadRequest)
    }

    pub fn clear_fault(&self) -> Result<()> {
        self.main.handle_input(MainInput::ClearFault)
    }

    /// Route `power/*` events into the main machine.
    pub fn bind(&self, dispatcher: &Dispatcher) -> HandlerId {
        let events = PowerEvents::register();
        let main = self.main.clone();
        dispatcher.on_class(events.on, move |event| {
            let Some(input) = events.input_for(event.event_type()) else {
                return false;
            };
            if let Err(e) = main.handle_input(input) {
                warn!("power: {} not handled: {}", input.label(), e);
            }
            true
        })
    }

    pub fn main_state(&self) -> Option<MainState> {
        self.main.current_state()
    }

    pub fn load_state(&self) -> Option<LoadState> {
        self.load.current_state()
    }

    pub fn load_pin_faults(&self) -> u32 {
        self.load.with_behavior(|flow| flow.pin_faults).unwrap_or(0)
    }

    pub fn status(&self) -> [MachineStatus; 2] {
        [self.main.status(), self.load.status()]
    }

    pub fn main_machine(&self) -> &Machine<MainFlow<R, P>> {
        &self.main
    }

    pub fn load_machine(&self) -> &Machine<LoadFlow<P>> {
        &self.load
    }
}
