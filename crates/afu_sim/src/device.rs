use crate::vtp::Translator;
use crate::{Fault, SimConfig};
use afu_common::AfuId;
use afu_common::csr::{COUNT, Csr};
use afu_common::line::LINE_BYTES;
use afu_core::csr::CsrTransport;
use afu_core::device::{Accelerator, Target, TranslationStats};
use afu_core::dma::{DmaAllocator, DmaBuffer, HostMemory};
use afu_core::verify::OutputUnit;
use afu_core::{AfuError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Commands delivered to the engine thread.
enum Command {
    /// Run the job started with this generation number.
    Start(u64),
    Shutdown,
}

/// State visible to both the host handle and the engine thread.
struct Shared {
    regs: [AtomicU64; COUNT],
    memory: HostMemory,
    vtp: Mutex<Translator>,
    halt: AtomicBool,
    /// Generation of the most recent start trigger.
    generation: AtomicU64,
    /// Held while the engine publishes results and while the host triggers
    /// a start, so a superseded job can never raise completion for a newer
    /// one.
    publish: Mutex<()>,
    config: SimConfig,
}

impl Shared {
    fn reg(&self, reg: Csr) -> &AtomicU64 {
        &self.regs[reg.index() as usize]
    }

    fn is_current(&self, job: u64) -> bool {
        self.generation.load(Ordering::Acquire) == job
    }

    fn lock_publish(&self) -> MutexGuard<'_, ()> {
        self.publish.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Simulated accelerator function.
///
/// Registers are plain atomics. A host write of zero to the start/done
/// register additionally posts a start command to the engine thread, which
/// is how the trigger edge reaches the device. Every start supersedes the
/// job before it: an older job still in flight (for example after the host
/// timed out on it) stops copying and never touches the registers again.
/// Dropping the handle stops the engine and joins its thread.
pub struct SimAccelerator {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SimAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimAccelerator")
            .field("afu_id", &self.shared.config.afu_id)
            .field("fault", &self.shared.config.fault)
            .finish()
    }
}

impl SimAccelerator {
    /// Starts the engine thread for a new simulated device.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::Connection`] if the engine thread cannot be
    /// spawned.
    pub fn spawn(config: SimConfig) -> Result<Self> {
        let memory = match config.memory_limit {
            Some(limit) => HostMemory::with_limit(limit),
            None => HostMemory::new(),
        };
        let shared = Arc::new(Shared {
            regs: Default::default(),
            memory,
            vtp: Mutex::new(Translator::new()),
            halt: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            publish: Mutex::new(()),
            config,
        });

        let (commands, inbox) = mpsc::channel();
        let engine = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("afu-sim".into())
            .spawn(move || run_engine(&engine, &inbox))
            .map_err(|e| {
                AfuError::connection(&shared.config.afu_id, format!("cannot start engine: {e}"))
            })?;

        tracing::info!("Simulated accelerator {} ready", shared.config.afu_id);
        Ok(Self {
            shared,
            commands,
            worker: Some(worker),
        })
    }
}

impl Drop for SimAccelerator {
    fn drop(&mut self) {
        self.shared.halt.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl CsrTransport for SimAccelerator {
    fn write_csr(&self, reg: Csr, value: u64) -> Result<()> {
        if reg == Csr::StartDone && value == 0 {
            let job = {
                let _publish = self.shared.lock_publish();
                self.shared.reg(reg).store(value, Ordering::SeqCst);
                self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1
            };
            return self
                .commands
                .send(Command::Start(job))
                .map_err(|_| AfuError::transport("simulated engine has stopped"));
        }
        self.shared.reg(reg).store(value, Ordering::SeqCst);
        Ok(())
    }

    fn read_csr(&self, reg: Csr) -> Result<u64> {
        Ok(self.shared.reg(reg).load(Ordering::Acquire))
    }
}

impl DmaAllocator for SimAccelerator {
    fn allocate(&self, bytes: usize) -> Result<DmaBuffer> {
        self.shared.memory.allocate(bytes)
    }
}

impl Accelerator for SimAccelerator {
    fn id(&self) -> AfuId {
        self.shared.config.afu_id
    }

    fn target(&self) -> Target {
        Target::Simulated
    }

    fn translation_stats(&self) -> Option<TranslationStats> {
        let vtp = self.shared.vtp.lock().unwrap_or_else(PoisonError::into_inner);
        Some(vtp.stats())
    }
}

fn run_engine(shared: &Shared, inbox: &Receiver<Command>) {
    while let Ok(Command::Start(job)) = inbox.recv() {
        if shared.halt.load(Ordering::Acquire) {
            break;
        }
        if shared.is_current(job) {
            copy_job(shared, job);
        } else {
            tracing::debug!("Skipping superseded job {job}");
        }
    }
    tracing::debug!("Simulated engine stopped");
}

/// One pass-through job: copy every input line, publish the counter, then
/// raise completion. Abandoned as soon as a newer start arrives.
fn copy_job(shared: &Shared, job: u64) {
    let config = &shared.config;
    let input_addr = shared.reg(Csr::InputAddr).load(Ordering::Acquire);
    let lines = shared.reg(Csr::InputLines).load(Ordering::Acquire) as usize;
    let output_addr = shared.reg(Csr::OutputAddr).load(Ordering::Acquire);
    tracing::debug!(
        "Engine start: input={input_addr:#x} lines={lines} output={output_addr:#x}"
    );

    let (input, output) = {
        let mut vtp = shared.vtp.lock().unwrap_or_else(PoisonError::into_inner);
        (
            vtp.resolve(&shared.memory, input_addr),
            vtp.resolve(&shared.memory, output_addr),
        )
    };
    let (Some(input), Some(output)) = (input, output) else {
        let _publish = shared.lock_publish();
        if shared.is_current(job) {
            shared.reg(Csr::OutputUsed).store(0, Ordering::Release);
            shared.reg(Csr::StartDone).store(1, Ordering::Release);
        }
        return;
    };

    let lines = lines.min(input.len_lines()).min(output.len_lines());
    let late_lag = match config.fault {
        Some(Fault::LateFinalLine { lag }) if lines > 0 => Some(lag),
        _ => None,
    };
    let eager_lines = if late_lag.is_some() { lines - 1 } else { lines };

    for index in 0..eager_lines {
        if shared.halt.load(Ordering::Acquire) {
            return;
        }
        if !shared.is_current(job) {
            tracing::debug!("Job {job} superseded after {index} lines");
            return;
        }
        {
            let mut vtp = shared.vtp.lock().unwrap_or_else(PoisonError::into_inner);
            vtp.touch(&input, input_addr + (index * LINE_BYTES) as u64);
            vtp.touch(&output, output_addr + (index * LINE_BYTES) as u64);
        }
        output.store_line(index, &input.line(index));
        if !config.line_latency.is_zero() {
            thread::sleep(config.line_latency);
        }
    }

    if let Some(Fault::Corrupt { position }) = config.fault {
        if position < output.len_words() {
            output.store(position, output.load(position) ^ 1);
        }
    }

    let counter = match (config.fault, config.counter_unit) {
        (Some(Fault::MisreportOutput { value }), _) => value,
        (_, OutputUnit::Lines) => lines as u64,
        (_, OutputUnit::Bytes) => (lines * LINE_BYTES) as u64,
    };
    {
        let _publish = shared.lock_publish();
        if !shared.is_current(job) {
            tracing::debug!("Job {job} superseded before completion");
            return;
        }
        shared.reg(Csr::OutputUsed).store(counter, Ordering::Release);

        if config.fault == Some(Fault::Stall) {
            tracing::debug!("Engine stalled before completion");
            return;
        }
        shared.reg(Csr::StartDone).store(1, Ordering::Release);
    }
    tracing::debug!("Engine done: {lines} lines, counter={counter}");

    if let Some(lag) = late_lag {
        thread::sleep(lag);
        if !shared.is_current(job) {
            return;
        }
        let index = lines - 1;
        output.store_line(index, &input.line(index));
        tracing::debug!("Final line {index} committed {lag:?} after completion");
    }
}
