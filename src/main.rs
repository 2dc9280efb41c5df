//! Reactor host simulation, main entry point.
//!
//! Runs the event loop on the main thread with the two reference
//! subsystems attached to simulated drivers.  Driver callbacks and the
//! operator console run on their own threads and reach the loop only
//! through `EventSender`, as they would on the device.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  console thread ──CommandBus::execute──┐                     │
//! │  SimModem threads ──modem/* events─────┤                     │
//! │  SimRail thread ──power/rail_good──────┤                     │
//! │                                        ▼                     │
//! │            EventLoop::run_once (main thread)                 │
//! │            ├── ConfirmedSend   (modem machine)               │
//! │            └── PowerSupervisor (main + load machines)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `reactor-sim [config.json]`.  Log level from `REACTOR_LOG`.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use reactor_core::adapters::log_sink::StderrLogger;
use reactor_core::adapters::time::MonotonicClock;
use reactor_core::app::commands::{CommandBus, on_command};
use reactor_core::app::modem::{ConfirmedSend, ModemEvents, ModemTiming};
use reactor_core::app::ports::{ModemError, ModemPort, PowerRail};
use reactor_core::app::power::{PowerEvents, PowerSupervisor, PowerTiming};
use reactor_core::config::LoopConfig;
use reactor_core::diagnostics;
use reactor_core::{Event, EventLoop, EventSender};

// ── Simulated drivers ─────────────────────────────────────────

/// Answers every chunk from a driver thread: accepted, transmitted,
/// then a server confirmation.
struct SimModem {
    tx: EventSender,
    events: ModemEvents,
}

impl ModemPort for SimModem {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), ModemError> {
        let tx = self.tx.clone();
        let events = self.events;
        let airtime = Duration::from_millis(5 + chunk.len() as u64);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            tx.post_event(Event::new(events.accepted));
            thread::sleep(airtime);
            tx.post_event(Event::new(events.transmitted));
            thread::sleep(Duration::from_millis(60));
            tx.post_event(Event::new(events.confirmed));
        });
        Ok(())
    }

    fn abort(&mut self) {
        warn!("sim: modem abort");
    }
}

/// Reports power-good shortly after being enabled.
struct SimRail {
    tx: EventSender,
    events: PowerEvents,
}

impl PowerRail for SimRail {
    fn set_enabled(&mut self, on: bool) {
        info!("sim: rail {}", if on { "enabled" } else { "disabled" });
        if on {
            let tx = self.tx.clone();
            let good = self.events.rail_good;
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                tx.post_event(Event::new(good));
            });
        }
    }

    fn is_good(&self) -> bool {
        false
    }
}

struct SimPin;

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        info!("sim: load enable low");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        info!("sim: load enable high");
        Ok(())
    }
}

// ── Main ──────────────────────────────────────────────────────

fn load_config() -> Result<LoopConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(LoopConfig::default());
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let config = LoopConfig::from_json(&text).with_context(|| format!("parsing {path}"))?;
    info!("Config loaded from {}", path);
    Ok(config)
}

fn main() -> Result<()> {
    StderrLogger::init_from_env()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  reactor-sim v{}                  ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = load_config()?;
    let clock = MonotonicClock::new();
    let event_loop = EventLoop::with_clock(config.clone(), clock)?;
    let dispatcher = event_loop.dispatcher();

    // ── Subsystems ────────────────────────────────────────────
    let modem = Rc::new(ConfirmedSend::new(
        event_loop.scheduler(),
        config.machine.clone(),
        ModemTiming {
            chunk_size: 16,
            accept_timeout_ms: 200,
            transmit_timeout_ms: 500,
            confirm_timeout_ms: 2_000,
            retry_delay_ms: 500,
            max_attempts: 3,
        },
        SimModem {
            tx: event_loop.sender(),
            events: ModemEvents::register(),
        },
    )?);
    modem.on_outcome(|outcome| info!("sim: send finished: {:?}", outcome));
    modem.machine().set_tracing(true);
    modem.bind(dispatcher);

    let power = Rc::new(PowerSupervisor::new(
        event_loop.scheduler(),
        &config.machine,
        PowerTiming::default(),
        SimRail {
            tx: event_loop.sender(),
            events: PowerEvents::register(),
        },
        SimPin,
    ));
    power.bind(dispatcher);

    modem.start()?;
    power.start()?;

    // ── Console commands ──────────────────────────────────────
    let bus = CommandBus::new(&event_loop);

    let (m, p) = (Rc::clone(&modem), Rc::clone(&power));
    on_command(dispatcher, "status", move |_| {
        let [main, load] = p.status();
        for status in [m.machine().status(), main, load] {
            info!("{}", diagnostics::machine_line(&status));
        }
        true
    });

    let p = Rc::clone(&power);
    on_command(dispatcher, "power", move |arg| {
        let res = match arg {
            "on" => p.power_on(),
            "off" => p.power_off(),
            "load" => p.request_load(),
            "clear" => p.clear_fault(),
            _ => return false,
        };
        res.is_ok()
    });

    let m = Rc::clone(&modem);
    on_command(dispatcher, "send", move |text| {
        !text.is_empty() && m.send(text.as_bytes().to_vec()).is_ok()
    });

    // ── Scripted operator session ─────────────────────────────
    let done = Arc::new(AtomicBool::new(false));
    let console = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let script = [
                "status",
                "power load",
                "power on",
                "send the quick brown fox jumps over the lazy dog",
                "status",
                "power off",
                "status",
                "reboot",
            ];
            for line in script {
                thread::sleep(Duration::from_millis(300));
                match bus.execute(line) {
                    Ok(true) => {}
                    Ok(false) => warn!("console: '{}' not handled", line),
                    Err(e) => warn!("console: '{}' failed: {}", line, e),
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    event_loop.run_until(10, || done.load(Ordering::Acquire));
    if console.join().is_err() {
        warn!("console thread panicked");
    }

    info!("{}", event_loop.stats().status_line());
    info!("sim: done after {}s", clock.uptime_secs());
    Ok(())
}
