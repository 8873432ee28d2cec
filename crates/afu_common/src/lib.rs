//! Common definitions shared by the host driver, the simulated accelerator,
//! and any other implementation of the line-copy handshake.
//!
//! This crate pins down the parts of the protocol that must be bit-exact on
//! both sides of the link: the control/status register numbering, the line
//! geometry of shared buffers, and the identifier used to select an
//! accelerator function.

#![no_std]

use core::fmt;

/// Control/status register layout of the line-copy accelerator.
///
/// The numbering is part of the hardware contract. Any implementation
/// targeting the same accelerator must keep these indices unchanged.
pub mod csr {
    /// Input buffer address. Written by the host.
    pub const INPUT_ADDR: u32 = 0;

    /// Number of lines in the input buffer. Written by the host.
    pub const INPUT_LINES: u32 = 1;

    /// Output buffer address. Written by the host.
    pub const OUTPUT_ADDR: u32 = 2;

    /// Amount of output produced by the accelerator.
    ///
    /// Reset to zero by the host while arming; written by the accelerator
    /// before it raises completion. Whether the value counts lines or bytes
    /// depends on the accelerator revision.
    pub const OUTPUT_USED: u32 = 3;

    /// Combined start/done flag.
    ///
    /// A host write of zero is the start trigger. The accelerator sets the
    /// register to a nonzero value when it has finished.
    pub const START_DONE: u32 = 4;

    /// Number of registers used by the handshake.
    pub const COUNT: usize = 5;

    /// Typed register index.
    ///
    /// Discriminants are the wire indices above, so `Csr::StartDone as u32`
    /// is exactly what goes on the bus.
    #[repr(u32)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum Csr {
        /// See [`INPUT_ADDR`].
        InputAddr = INPUT_ADDR,
        /// See [`INPUT_LINES`].
        InputLines = INPUT_LINES,
        /// See [`OUTPUT_ADDR`].
        OutputAddr = OUTPUT_ADDR,
        /// See [`OUTPUT_USED`].
        OutputUsed = OUTPUT_USED,
        /// See [`START_DONE`].
        StartDone = START_DONE,
    }

    impl Csr {
        /// All registers in wire order.
        pub const ALL: [Csr; COUNT] = [
            Csr::InputAddr,
            Csr::InputLines,
            Csr::OutputAddr,
            Csr::OutputUsed,
            Csr::StartDone,
        ];

        /// Wire index of the register.
        pub const fn index(self) -> u32 {
            self as u32
        }

        /// Looks up a register from its wire index.
        pub const fn from_index(index: u32) -> Option<Self> {
            match index {
                INPUT_ADDR => Some(Csr::InputAddr),
                INPUT_LINES => Some(Csr::InputLines),
                OUTPUT_ADDR => Some(Csr::OutputAddr),
                OUTPUT_USED => Some(Csr::OutputUsed),
                START_DONE => Some(Csr::StartDone),
                _ => None,
            }
        }
    }

    impl core::fmt::Display for Csr {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "CSR{}", self.index())
        }
    }
}

/// Geometry of the shared line buffers.
pub mod line {
    /// Number of 32-bit signed integers in one line.
    pub const LINE_WORDS: usize = 16;

    /// Size of one line in bytes. Matches one host cache line.
    pub const LINE_BYTES: usize = LINE_WORDS * core::mem::size_of::<i32>();

    /// Bytes per element of a line.
    pub const WORD_BYTES: usize = core::mem::size_of::<i32>();

    /// Output capacity relative to input capacity.
    ///
    /// Sized for an accelerator whose output may be larger than its input.
    pub const OUTPUT_EXPANSION: usize = 2;

    /// Input capacity used by the reference copy test.
    pub const REFERENCE_INPUT_LINES: usize = 5;

    /// One line of shared memory.
    ///
    /// Both input and output buffers are organised as whole multiples of
    /// this record.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Line {
        pub data: [i32; LINE_WORDS],
    }

    impl Line {
        /// A line with every field set to zero.
        pub const ZERO: Line = Line {
            data: [0; LINE_WORDS],
        };

        /// Line `index` of the ascending test pattern.
        ///
        /// Line 0 holds 1..=16, line 1 holds 17..=32 and so on.
        pub fn pattern(index: usize) -> Self {
            let mut data = [0; LINE_WORDS];
            let first = index * LINE_WORDS;
            for (field, slot) in data.iter_mut().enumerate() {
                *slot = (first + field + 1) as i32;
            }
            Self { data }
        }
    }

    const _: () = assert!(core::mem::size_of::<Line>() == LINE_BYTES);
}

/// 128-bit identifier of an accelerator function.
///
/// Printed in the canonical 8-4-4-4-12 hexadecimal form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AfuId(pub [u8; 16]);

impl AfuId {
    /// Identifier of the line-copy accelerator function.
    pub const LINE_COPY: AfuId = AfuId([
        0x3d, 0x53, 0x1a, 0x6e, 0x5c, 0x0f, 0x4b, 0x72, 0x9e, 0x21, 0x8a, 0x44, 0xc6, 0x0b, 0x10,
        0x57,
    ]);

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for AfuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AfuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AfuId({})", self)
    }
}
