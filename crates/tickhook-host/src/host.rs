//! The simulated host program.
//!
//! A stand-in for the opaque program whose tick is being intercepted. It
//! owns a synthetic code image containing a tick routine, a tick counter,
//! and the [`RedirectTable`] that plays the role of the processor: every
//! tick it walks the routine's instructions in order and reports each one
//! to the table, which diverts execution at any active redirect.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tickhook_core::config::HostConfig;
use tickhook_core::dispatch::TickCounter;
use tickhook_core::image::CodeImage;
use tickhook_core::redirect::RedirectTable;
use tickhook_types::Address;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::error::HostError;

/// Filler for bytes outside the tick routine (`int3`).
const FILLER: u8 = 0xCC;

/// Bytes left after the routine so scans never run off its end.
const TAIL_PADDING: usize = 0x40;

/// Machine code of the host's tick routine.
pub const TICK_ROUTINE: [u8; 28] = [
    0x55, // push ebp
    0x8B, 0xEC, // mov ebp, esp
    0x53, 0x56, 0x57, // push ebx; push esi; push edi
    0xA1, 0x00, 0x10, 0x6A, 0x00, // mov eax, [tick_count]
    0x40, // inc eax
    0xA3, 0x00, 0x10, 0x6A, 0x00, // mov [tick_count], eax
    0xE8, 0x10, 0x00, 0x00, 0x00, // call simulation_step
    0x90, // nop
    0x5F, // pop edi
    0x5E, 0x5B, // pop esi; pop ebx
    0x5D, // pop ebp
    0xC3, // ret
];

/// Start offset of each instruction in [`TICK_ROUTINE`], in execution order.
const INSTRUCTION_OFFSETS: [u64; 15] = [0, 1, 3, 4, 5, 6, 11, 12, 17, 22, 23, 24, 25, 26, 27];

/// Offset of the `call simulation_step` instruction.
const STEP_CALL_OFFSET: u64 = 17;

/// Lay out the synthetic code image described by `config`.
///
/// # Errors
///
/// Returns [`HostError::Image`] if the routine offset does not fit in
/// memory.
pub fn build_image(config: &HostConfig) -> Result<CodeImage, HostError> {
    let start = usize::try_from(config.routine_offset).map_err(|e| HostError::Image {
        message: format!("routine offset {:#X} does not fit in memory: {e}", config.routine_offset),
    })?;
    let end = start
        .checked_add(TICK_ROUTINE.len())
        .ok_or_else(|| HostError::Image {
            message: format!("routine offset {start:#X} overflows"),
        })?;
    let size = end.checked_add(TAIL_PADDING).ok_or_else(|| HostError::Image {
        message: format!("image of {end:#X} bytes overflows"),
    })?;

    let mut bytes = vec![FILLER; size];
    if let Some(slot) = bytes.get_mut(start..end) {
        slot.copy_from_slice(&TICK_ROUTINE);
    }
    Ok(CodeImage::new(Address::new(config.image_base), bytes))
}

/// The host's tick counter, incremented once per tick before the tick
/// routine is entered.
#[derive(Debug, Default)]
pub struct HostTickCounter(Cell<u64>);

impl HostTickCounter {
    /// Increment the counter and return the new value.
    pub fn advance(&self) -> u64 {
        let next = self.0.get().saturating_add(1);
        self.0.set(next);
        next
    }
}

impl TickCounter for HostTickCounter {
    fn current_tick_count(&self) -> u64 {
        self.0.get()
    }
}

/// Outcome of one pass through the tick routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTrace {
    /// Host tick count during the pass.
    pub tick_count: u64,
    /// Number of redirects that diverted execution.
    pub redirects_taken: u32,
}

/// A host that runs its tick routine on a fixed interval.
#[derive(Debug)]
pub struct SimulatedHost {
    counter: Rc<HostTickCounter>,
    redirects: RedirectTable,
    instructions: Vec<Address>,
    step_site: Address,
    steps: u64,
}

impl SimulatedHost {
    /// Create a host whose tick routine sits at
    /// `image_base + routine_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Image`] if any instruction address overflows.
    pub fn new(config: &HostConfig) -> Result<Self, HostError> {
        let routine = Address::new(config.image_base)
            .checked_add(config.routine_offset)
            .ok_or_else(|| overflow(config.image_base, config.routine_offset))?;
        let at = |offset: u64| {
            routine
                .checked_add(offset)
                .ok_or_else(|| overflow(routine.get(), offset))
        };

        let instructions = INSTRUCTION_OFFSETS
            .iter()
            .map(|&offset| at(offset))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            counter: Rc::new(HostTickCounter::default()),
            redirects: RedirectTable::new(),
            instructions,
            step_site: at(STEP_CALL_OFFSET)?,
            steps: 0,
        })
    }

    /// Shared handle to the host's tick counter.
    pub fn counter(&self) -> Rc<HostTickCounter> {
        Rc::clone(&self.counter)
    }

    /// The redirect table hooks are installed into.
    pub const fn redirects_mut(&mut self) -> &mut RedirectTable {
        &mut self.redirects
    }

    /// Number of simulation steps executed so far.
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Run one tick: bump the counter, then execute the tick routine from
    /// its first instruction to its last.
    pub fn run_tick(&mut self) -> TickTrace {
        let tick_count = self.counter.advance();
        let mut redirects_taken = 0_u32;

        for &address in &self.instructions {
            if self.redirects.reach(address) {
                redirects_taken = redirects_taken.saturating_add(1);
            }
            if address == self.step_site {
                self.steps = self.steps.saturating_add(1);
                trace!(tick_count, step = self.steps, "Simulation step");
            }
        }

        TickTrace {
            tick_count,
            redirects_taken,
        }
    }

    /// Run `config.max_ticks` ticks, one every `config.tick_interval_ms`.
    /// Returns the number of ticks run.
    pub async fn run(&mut self, config: &HostConfig) -> u64 {
        let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0_u64;
        while ticks < config.max_ticks {
            interval.tick().await;
            let trace = self.run_tick();
            ticks = ticks.saturating_add(1);
            debug!(
                tick_count = trace.tick_count,
                redirects_taken = trace.redirects_taken,
                "Host tick complete"
            );
        }
        ticks
    }
}

fn overflow(base: u64, offset: u64) -> HostError {
    HostError::Image {
        message: format!("address {base:#X} + {offset:#X} overflows"),
    }
}
