//! Deterministic single-threaded accelerator double.
//!
//! The device copies input to output synchronously when the start register
//! is written. Completion and the final line's visibility are driven by
//! register reads and by virtual time, so every test is reproducible.

#![allow(dead_code)]

use afu_core::clock::Clock;
use afu_core::csr::CsrTransport;
use afu_core::device::{Accelerator, Target};
use afu_core::dma::{DmaAllocator, DmaBuffer, DmaRegion, HostMemory};
use afu_core::{AfuId, Csr, Line, Result};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Write(Csr, u64),
    Read(Csr, u64),
}

/// What the device writes into the output counter.
#[derive(Debug, Clone, Copy)]
pub enum Counter {
    Lines,
    Bytes,
    Fixed(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct Behaviour {
    /// Status reads that still return zero after start.
    pub busy_reads: u32,
    pub never_complete: bool,
    /// Keep the final output line back until virtual time advances.
    pub withhold_final_line: bool,
    /// Flip one output element after copying.
    pub corrupt: Option<usize>,
    pub counter: Counter,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            busy_reads: 0,
            never_complete: false,
            withhold_final_line: false,
            corrupt: None,
            counter: Counter::Lines,
        }
    }
}

pub struct ScriptedDevice {
    memory: HostMemory,
    regs: RefCell<[u64; 5]>,
    log: RefCell<Vec<Access>>,
    behaviour: Behaviour,
    busy_left: Cell<Option<u32>>,
    pending: RefCell<Vec<(Arc<DmaRegion>, usize, Line)>>,
}

impl ScriptedDevice {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            memory: HostMemory::new(),
            regs: RefCell::new([0; 5]),
            log: RefCell::new(Vec::new()),
            behaviour,
            busy_left: Cell::new(None),
            pending: RefCell::new(Vec::new()),
        }
    }

    pub fn log(&self) -> Vec<Access> {
        self.log.borrow().clone()
    }

    /// Lets withheld output lines land in memory.
    pub fn commit_pending(&self) {
        for (region, index, line) in self.pending.borrow_mut().drain(..) {
            region.store_line(index, &line);
        }
    }

    fn run_copy(&self) {
        let regs = *self.regs.borrow();
        let lines = regs[Csr::InputLines.index() as usize] as usize;
        let (Some((input, 0)), Some((output, 0))) = (
            self.memory.resolve(regs[Csr::InputAddr.index() as usize]),
            self.memory.resolve(regs[Csr::OutputAddr.index() as usize]),
        ) else {
            return;
        };

        for index in 0..lines {
            let line = input.line(index);
            if self.behaviour.withhold_final_line && index + 1 == lines {
                self.pending
                    .borrow_mut()
                    .push((Arc::clone(&output), index, line));
            } else {
                output.store_line(index, &line);
            }
        }
        if let Some(k) = self.behaviour.corrupt {
            output.store(k, output.load(k) ^ 1);
        }

        let counter = match self.behaviour.counter {
            Counter::Lines => lines as u64,
            Counter::Bytes => (lines * 64) as u64,
            Counter::Fixed(value) => value,
        };
        self.regs.borrow_mut()[Csr::OutputUsed.index() as usize] = counter;
        self.busy_left.set(Some(self.behaviour.busy_reads));
    }
}

impl CsrTransport for ScriptedDevice {
    fn write_csr(&self, reg: Csr, value: u64) -> Result<()> {
        self.log.borrow_mut().push(Access::Write(reg, value));
        self.regs.borrow_mut()[reg.index() as usize] = value;
        if reg == Csr::StartDone && value == 0 {
            self.run_copy();
        }
        Ok(())
    }

    fn read_csr(&self, reg: Csr) -> Result<u64> {
        if reg == Csr::StartDone && !self.behaviour.never_complete {
            match self.busy_left.get() {
                Some(0) => {
                    self.regs.borrow_mut()[reg.index() as usize] = 1;
                    self.busy_left.set(None);
                }
                Some(n) => self.busy_left.set(Some(n - 1)),
                None => {}
            }
        }
        let value = self.regs.borrow()[reg.index() as usize];
        self.log.borrow_mut().push(Access::Read(reg, value));
        Ok(value)
    }
}

impl DmaAllocator for ScriptedDevice {
    fn allocate(&self, bytes: usize) -> Result<DmaBuffer> {
        self.memory.allocate(bytes)
    }
}

impl Accelerator for ScriptedDevice {
    fn id(&self) -> AfuId {
        AfuId::LINE_COPY
    }

    fn target(&self) -> Target {
        Target::Simulated
    }
}

/// Virtual clock; every sleep lets the device commit withheld writes.
pub struct VirtualClock<'a> {
    device: &'a ScriptedDevice,
    now: Duration,
}

impl<'a> VirtualClock<'a> {
    pub fn new(device: &'a ScriptedDevice) -> Self {
        Self {
            device,
            now: Duration::ZERO,
        }
    }
}

impl Clock for VirtualClock<'_> {
    fn elapsed(&self) -> Duration {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.now += duration;
        self.device.commit_pending();
    }
}
