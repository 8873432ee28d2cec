//! Protocol-level tests against a deterministic accelerator double.

mod common;

use afu_core::clock::CancelToken;
use afu_core::device::Target;
use afu_core::handshake::{Handshake, HandshakeState, PollConfig};
use afu_core::line::generate;
use afu_core::session::{CopyTest, SessionConfig, Verdict};
use afu_core::verify::{OutputUnit, verify};
use afu_core::{AfuError, Csr};
use common::{Access, Behaviour, Counter, ScriptedDevice, VirtualClock};
use std::time::Duration;

fn session(input_lines: usize) -> SessionConfig {
    SessionConfig {
        input_lines,
        ..SessionConfig::reference(Target::Physical)
    }
}

#[test]
fn nominal_pass_through_copy() {
    let device = ScriptedDevice::new(Behaviour::default());
    let mut clock = VirtualClock::new(&device);
    let report = CopyTest::new(session(5))
        .unwrap()
        .run(&device, &mut clock, &CancelToken::new())
        .unwrap();

    assert_eq!(report.produced_raw, 5);
    assert_eq!(report.produced_elements, 80);
    assert_eq!(report.verification.checked, 80);
    assert_eq!(report.verification.errors, 0);
    assert_eq!(report.verdict(), Verdict::Pass);
    assert!(report.ensure_pass().is_ok());
    for position in 0..80 {
        assert_eq!(report.output.load(position), position as i32 + 1);
    }
    // The expansion half of the output buffer is untouched.
    assert_eq!(report.output.load(80), 0);
}

#[test]
fn setup_registers_precede_start_and_done() {
    let device = ScriptedDevice::new(Behaviour {
        busy_reads: 3,
        ..Behaviour::default()
    });
    let mut clock = VirtualClock::new(&device);
    let report = CopyTest::new(session(2))
        .unwrap()
        .run(&device, &mut clock, &CancelToken::new())
        .unwrap();
    assert_eq!(report.poll.attempts, 4);

    let log = device.log();
    let writes: Vec<Csr> = log
        .iter()
        .filter_map(|access| match access {
            Access::Write(reg, _) => Some(*reg),
            Access::Read(..) => None,
        })
        .collect();
    assert_eq!(
        writes,
        vec![
            Csr::InputAddr,
            Csr::InputLines,
            Csr::OutputAddr,
            Csr::OutputUsed,
            Csr::StartDone
        ]
    );

    let start = log
        .iter()
        .position(|access| *access == Access::Write(Csr::StartDone, 0))
        .unwrap();
    for access in &log[..start] {
        assert!(!matches!(access, Access::Read(Csr::StartDone, v) if *v != 0));
    }
    assert!(log[..start].contains(&Access::Write(Csr::InputLines, 2)));
    assert!(log[..start].contains(&Access::Write(Csr::OutputUsed, 0)));

    // Output size is read only once completion has been seen.
    let done = log
        .iter()
        .position(|access| matches!(access, Access::Read(Csr::StartDone, v) if *v != 0))
        .unwrap();
    let size_read = log
        .iter()
        .position(|access| matches!(access, Access::Read(Csr::OutputUsed, _)))
        .unwrap();
    assert!(start < done && done < size_read);
}

#[test]
fn skipping_the_drain_reads_stale_output() {
    let device = ScriptedDevice::new(Behaviour {
        withhold_final_line: true,
        ..Behaviour::default()
    });
    let mut clock = VirtualClock::new(&device);

    let input = generate(&device, 5).unwrap();
    let output = afu_core::dma::DmaAllocator::allocate(&device, 10 * 64).unwrap();
    let mut handshake = Handshake::new(&device, PollConfig::for_target(Target::Physical)).unwrap();
    handshake.arm(&input, &output).unwrap();
    handshake.start().unwrap();
    handshake.wait_done(&mut clock, &CancelToken::new()).unwrap();

    let produced = OutputUnit::Lines.elements(handshake.produced().unwrap());
    assert_eq!(produced, 80);
    assert_eq!(verify(&output, produced), 16);
}

#[test]
fn honouring_the_drain_reads_final_output() {
    let device = ScriptedDevice::new(Behaviour {
        withhold_final_line: true,
        ..Behaviour::default()
    });
    let mut clock = VirtualClock::new(&device);
    let report = CopyTest::new(session(5))
        .unwrap()
        .run(&device, &mut clock, &CancelToken::new())
        .unwrap();

    assert_eq!(report.drained, PollConfig::PHYSICAL_INTERVAL * 2);
    assert_eq!(report.verification.errors, 0);
    assert_eq!(report.verdict(), Verdict::Pass);
}

#[test]
fn zero_reported_output_checks_nothing() {
    let device = ScriptedDevice::new(Behaviour {
        counter: Counter::Fixed(0),
        ..Behaviour::default()
    });
    let mut clock = VirtualClock::new(&device);
    let report = CopyTest::new(session(5))
        .unwrap()
        .run(&device, &mut clock, &CancelToken::new())
        .unwrap();

    assert_eq!(report.produced_elements, 0);
    assert_eq!(report.verification.checked, 0);
    assert_eq!(report.verification.errors, 0);
    assert_eq!(report.verdict(), Verdict::NoOutput);
    assert!(report.ensure_pass().is_err());
}

#[test]
fn single_corruption_is_reported_at_its_position() {
    for k in [0, 17, 79] {
        let device = ScriptedDevice::new(Behaviour {
            corrupt: Some(k),
            ..Behaviour::default()
        });
        let mut clock = VirtualClock::new(&device);
        let report = CopyTest::new(session(5))
            .unwrap()
            .run(&device, &mut clock, &CancelToken::new())
            .unwrap();

        assert_eq!(report.verification.errors, 1);
        assert_eq!(report.verification.first_mismatch(), Some(k));
        assert_eq!(report.verdict(), Verdict::Mismatch);
        assert!(matches!(
            report.ensure_pass(),
            Err(AfuError::VerificationMismatch { errors: 1, checked: 80 })
        ));
    }
}

#[test]
fn byte_counters_convert_to_elements() {
    let device = ScriptedDevice::new(Behaviour {
        counter: Counter::Bytes,
        ..Behaviour::default()
    });
    let mut clock = VirtualClock::new(&device);
    let config = SessionConfig {
        output_unit: OutputUnit::Bytes,
        ..session(3)
    };
    let report = CopyTest::new(config)
        .unwrap()
        .run(&device, &mut clock, &CancelToken::new())
        .unwrap();

    assert_eq!(report.produced_raw, 192);
    assert_eq!(report.produced_elements, 48);
    assert_eq!(report.verdict(), Verdict::Pass);
}

#[test]
fn stalled_device_times_out_without_reading_output() {
    let device = ScriptedDevice::new(Behaviour {
        never_complete: true,
        ..Behaviour::default()
    });
    let mut clock = VirtualClock::new(&device);
    let mut config = session(1);
    config.poll = config.poll.with_timeout(Some(Duration::from_millis(50)));

    let err = CopyTest::new(config)
        .unwrap()
        .run(&device, &mut clock, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, AfuError::Timeout { waited_ms: 50, .. }));
    assert!(
        !device
            .log()
            .iter()
            .any(|access| matches!(access, Access::Read(Csr::OutputUsed, _)))
    );
}

#[test]
fn rearming_after_completion_is_allowed() {
    let device = ScriptedDevice::new(Behaviour::default());
    let mut clock = VirtualClock::new(&device);
    let input = generate(&device, 1).unwrap();
    let output = afu_core::dma::DmaAllocator::allocate(&device, 2 * 64).unwrap();

    let mut handshake = Handshake::new(&device, PollConfig::for_target(Target::Physical)).unwrap();
    handshake.arm(&input, &output).unwrap();
    handshake.start().unwrap();
    handshake.wait_done(&mut clock, &CancelToken::new()).unwrap();
    assert_eq!(handshake.state(), HandshakeState::Done);

    handshake.arm(&input, &output).unwrap();
    assert_eq!(handshake.state(), HandshakeState::Armed);
}
