//! CSR handshake between the host and the line-copy accelerator.
//!
//! The exchange has four states:
//!
//! ```text
//! Unarmed --arm--> Armed --start--> Running --wait_done--> Done
//!    ^                                 |                     |
//!    +------ timeout / cancel ---------+                     |
//!    +---------------------- arm (next run) -----------------+
//! ```
//!
//! Arming publishes the buffer descriptors in register order 0..=3. Only the
//! write of zero to the start/done register (4) releases the device, and
//! only a nonzero read of that same register tells the host the device has
//! finished. Completion does not mean the final output line is visible yet,
//! so output memory must not be read before [`Handshake::drain`] returns.

use crate::clock::{CancelToken, Clock};
use crate::csr::CsrTransport;
use crate::device::Target;
use crate::dma::DmaBuffer;
use crate::{AfuError, Result};
use afu_common::csr::Csr;
use std::fmt;
use std::sync::atomic::{Ordering, fence};
use std::time::Duration;

/// Position of the host in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No descriptors published.
    Unarmed,
    /// Descriptors published, device not yet released.
    Armed,
    /// Start written, completion not yet observed.
    Running,
    /// Completion observed.
    Done,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unarmed => "unarmed",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Polling behaviour for one deployment target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two reads of the start/done register. Also the unit of
    /// the drain delay.
    pub interval: Duration,
    /// Number of `interval` delays inserted after completion before output
    /// memory is read. At least one.
    pub drain_delays: u32,
    /// Upper bound on the wait for completion. `None` polls forever.
    pub timeout: Option<Duration>,
}

impl PollConfig {
    /// Reference interval for simulated targets.
    pub const SIMULATED_INTERVAL: Duration = Duration::from_nanos(1_002_500_000);

    /// Reference interval for hardware targets.
    pub const PHYSICAL_INTERVAL: Duration = Duration::from_micros(2_500);

    /// Intervals slept after completion unless configured otherwise.
    pub const DEFAULT_DRAIN_DELAYS: u32 = 2;

    /// Reference configuration for `target`: unbounded wait, two drain delays.
    pub fn for_target(target: Target) -> Self {
        let interval = match target {
            Target::Simulated => Self::SIMULATED_INTERVAL,
            Target::Physical => Self::PHYSICAL_INTERVAL,
        };
        Self {
            interval,
            drain_delays: Self::DEFAULT_DRAIN_DELAYS,
            timeout: None,
        }
    }

    /// Replaces the poll interval. The drain delay scales with it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replaces the number of intervals slept after completion.
    pub fn with_drain_delays(mut self, drain_delays: u32) -> Self {
        self.drain_delays = drain_delays;
        self
    }

    /// Bounds the wait for completion; `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total pause inserted after completion.
    pub fn drain_time(&self) -> Duration {
        self.interval * self.drain_delays
    }

    /// Checks the configuration for values the protocol cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidConfig`] for a zero interval, fewer than one
    /// drain delay, or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(AfuError::invalid_config("poll interval must be nonzero"));
        }
        if self.drain_delays == 0 {
            return Err(AfuError::invalid_config(
                "at least one drain delay is required after completion",
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(AfuError::invalid_config(
                "timeout must be nonzero; leave it unset to wait forever",
            ));
        }
        Ok(())
    }
}

/// Result of a successful wait for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Reads of the start/done register, including the one that saw completion.
    pub attempts: u64,
    /// Time spent between the first read and the completing read.
    pub waited: Duration,
    /// Value the device left in the start/done register.
    pub done_value: u64,
}

/// Host end of the register handshake.
#[derive(Debug)]
pub struct Handshake<T> {
    csr: T,
    state: HandshakeState,
    config: PollConfig,
}

impl<T: CsrTransport> Handshake<T> {
    /// Creates an unarmed handshake over `csr`.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidConfig`] if `config` fails validation.
    pub fn new(csr: T, config: PollConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            csr,
            state: HandshakeState::Unarmed,
            config,
        })
    }

    /// Current position in the handshake.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Polling configuration this handshake was created with.
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Gives back the register transport, whatever state the handshake
    /// is in.
    pub fn into_inner(self) -> T {
        self.csr
    }

    fn expect(&self, operation: &'static str, allowed: &[HandshakeState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AfuError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Publishes the input and output descriptors and clears the output
    /// counter.
    ///
    /// The input buffer must already hold its final contents and have been
    /// fenced (see [`crate::line::generate`]).
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidState`] unless the handshake is unarmed or
    /// done, and propagates transport failures.
    pub fn arm(&mut self, input: &DmaBuffer, output: &DmaBuffer) -> Result<()> {
        self.expect("arm", &[HandshakeState::Unarmed, HandshakeState::Done])?;

        tracing::info!("input_buf={:#x} input_lines={}", input.iova(), input.len_lines());
        self.csr.write_csr(Csr::InputAddr, input.iova())?;
        self.csr.write_csr(Csr::InputLines, input.len_lines() as u64)?;

        tracing::info!("output_buf={:#x} output_lines={}", output.iova(), output.len_lines());
        self.csr.write_csr(Csr::OutputAddr, output.iova())?;
        self.csr.write_csr(Csr::OutputUsed, 0)?;

        self.state = HandshakeState::Armed;
        Ok(())
    }

    /// Releases the device by writing zero to the start/done register.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidState`] unless armed.
    pub fn start(&mut self) -> Result<()> {
        self.expect("start", &[HandshakeState::Armed])?;
        self.csr.write_csr(Csr::StartDone, 0)?;
        self.state = HandshakeState::Running;
        tracing::debug!("Start signalled");
        Ok(())
    }

    /// Polls the start/done register until the device reports completion.
    ///
    /// Each read that still finds zero is logged once. Between reads the
    /// loop sleeps one poll interval, shortened so it never oversleeps the
    /// configured timeout. Cancellation is checked before every sleep.
    ///
    /// On timeout or cancellation the handshake falls back to
    /// [`HandshakeState::Unarmed`] and output memory must be treated as
    /// invalid.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::Timeout`], [`AfuError::Cancelled`],
    /// [`AfuError::InvalidState`] unless running, or a transport failure.
    pub fn wait_done<C: Clock>(
        &mut self,
        clock: &mut C,
        cancel: &CancelToken,
    ) -> Result<PollOutcome> {
        self.expect("wait for completion", &[HandshakeState::Running])?;

        let started = clock.elapsed();
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            let flag = self.csr.read_csr(Csr::StartDone)?;
            if flag != 0 {
                fence(Ordering::Acquire);
                self.state = HandshakeState::Done;
                let waited = clock.elapsed().saturating_sub(started);
                tracing::info!("CSR4={flag} after {attempts} polls ({waited:?})");
                return Ok(PollOutcome {
                    attempts,
                    waited,
                    done_value: flag,
                });
            }
            tracing::debug!("CSR4=0 (poll {attempts})");

            if cancel.is_cancelled() {
                self.state = HandshakeState::Unarmed;
                tracing::warn!("Wait for completion cancelled after {attempts} polls");
                return Err(AfuError::Cancelled { attempts });
            }

            let waited = clock.elapsed().saturating_sub(started);
            let pause = match self.config.timeout {
                Some(limit) if waited >= limit => {
                    self.state = HandshakeState::Unarmed;
                    tracing::warn!("Accelerator still busy after {attempts} polls ({waited:?})");
                    return Err(AfuError::Timeout {
                        attempts,
                        waited_ms: waited.as_millis() as u64,
                    });
                }
                Some(limit) => self.config.interval.min(limit - waited),
                None => self.config.interval,
            };
            clock.sleep(pause);
        }
    }

    /// Waits out the post-completion drain delay.
    ///
    /// Returns the total time slept.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidState`] unless done.
    pub fn drain<C: Clock>(&mut self, clock: &mut C) -> Result<Duration> {
        self.expect("drain", &[HandshakeState::Done])?;
        for _ in 0..self.config.drain_delays {
            clock.sleep(self.config.interval);
        }
        Ok(self.config.drain_time())
    }

    /// Reads the raw output counter reported by the device.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidState`] unless done.
    pub fn produced(&self) -> Result<u64> {
        self.expect("read output size", &[HandshakeState::Done])?;
        let used = self.csr.read_csr(Csr::OutputUsed)?;
        tracing::info!("CSR3={used}");
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Register block whose start/done flag becomes nonzero after a fixed
    /// number of reads.
    struct CountdownCsr {
        regs: RefCell<[u64; 5]>,
        remaining: Cell<u32>,
    }

    impl CountdownCsr {
        fn new(reads_before_done: u32) -> Self {
            Self {
                regs: RefCell::new([0; 5]),
                remaining: Cell::new(reads_before_done),
            }
        }
    }

    impl CsrTransport for CountdownCsr {
        fn write_csr(&self, reg: Csr, value: u64) -> Result<()> {
            self.regs.borrow_mut()[reg.index() as usize] = value;
            Ok(())
        }

        fn read_csr(&self, reg: Csr) -> Result<u64> {
            if reg == Csr::StartDone {
                match self.remaining.get() {
                    0 => return Ok(1),
                    n => self.remaining.set(n - 1),
                }
            }
            Ok(self.regs.borrow()[reg.index() as usize])
        }
    }

    #[derive(Default)]
    struct StepClock {
        now: Duration,
        sleeps: Vec<Duration>,
    }

    impl Clock for StepClock {
        fn elapsed(&self) -> Duration {
            self.now
        }

        fn sleep(&mut self, duration: Duration) {
            self.now += duration;
            self.sleeps.push(duration);
        }
    }

    fn config() -> PollConfig {
        PollConfig::for_target(Target::Physical)
    }

    fn running(csr: CountdownCsr, config: PollConfig) -> Handshake<CountdownCsr> {
        let input = DmaBuffer::zeroed(1);
        let output = DmaBuffer::zeroed(2);
        let mut hs = Handshake::new(csr, config).unwrap();
        hs.arm(&input, &output).unwrap();
        hs.start().unwrap();
        hs
    }

    #[test]
    fn polls_until_nonzero() {
        let mut hs = running(CountdownCsr::new(3), config());
        let mut clock = StepClock::default();
        let outcome = hs.wait_done(&mut clock, &CancelToken::new()).unwrap();
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.waited, PollConfig::PHYSICAL_INTERVAL * 3);
        assert_eq!(outcome.done_value, 1);
        assert_eq!(hs.state(), HandshakeState::Done);
    }

    #[test]
    fn drain_sleeps_configured_multiple() {
        let mut hs = running(CountdownCsr::new(0), config());
        let mut clock = StepClock::default();
        hs.wait_done(&mut clock, &CancelToken::new()).unwrap();
        assert!(clock.sleeps.is_empty());

        let drained = hs.drain(&mut clock).unwrap();
        assert_eq!(drained, PollConfig::PHYSICAL_INTERVAL * 2);
        assert_eq!(clock.sleeps, vec![PollConfig::PHYSICAL_INTERVAL; 2]);
    }

    #[test]
    fn timeout_is_distinct_from_success() {
        let config = config().with_timeout(Some(Duration::from_millis(10)));
        let mut hs = running(CountdownCsr::new(u32::MAX), config);
        let mut clock = StepClock::default();
        let err = hs.wait_done(&mut clock, &CancelToken::new()).unwrap_err();
        match err {
            AfuError::Timeout { attempts, waited_ms } => {
                assert_eq!(waited_ms, 10);
                // 2.5 ms interval: reads at 0, 2.5, 5, 7.5 and 10 ms
                assert_eq!(attempts, 5);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(hs.state(), HandshakeState::Unarmed);
        assert_eq!(clock.now, Duration::from_millis(10));
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let mut hs = running(CountdownCsr::new(u32::MAX), config());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = hs.wait_done(&mut StepClock::default(), &cancel).unwrap_err();
        assert!(matches!(err, AfuError::Cancelled { attempts: 1 }));
        assert!(matches!(
            hs.produced(),
            Err(AfuError::InvalidState { .. })
        ));
    }

    #[test]
    fn out_of_order_steps_are_rejected() {
        let mut hs = Handshake::new(CountdownCsr::new(0), config()).unwrap();
        assert!(matches!(
            hs.start(),
            Err(AfuError::InvalidState { state: HandshakeState::Unarmed, .. })
        ));
        assert!(hs.drain(&mut StepClock::default()).is_err());
        assert!(hs.wait_done(&mut StepClock::default(), &CancelToken::new()).is_err());
    }

    #[test]
    fn config_requires_a_drain_delay() {
        assert!(config().validate().is_ok());
        assert!(config().with_drain_delays(0).validate().is_err());
        assert!(config().with_interval(Duration::ZERO).validate().is_err());
        assert!(config().with_timeout(Some(Duration::ZERO)).validate().is_err());
        assert!(Handshake::new(CountdownCsr::new(0), config().with_drain_delays(0)).is_err());
    }

    #[test]
    fn simulated_targets_poll_slower() {
        let sim = PollConfig::for_target(Target::Simulated);
        let hw = PollConfig::for_target(Target::Physical);
        assert!(sim.interval > hw.interval);
        assert_eq!(sim.drain_delays, 2);
        assert_eq!(sim.timeout, None);
    }
}
