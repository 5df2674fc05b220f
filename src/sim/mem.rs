//! Memory handling for the 8051 simulator.
//!
//! This module consists of:
//! - [`DataMem`]: The 256-byte internal data memory (register banks, stack, SFRs).
//! - [`ExtMem`]: The 64 KiB external data memory, reached through the data pointer.
//! - [`MemInitStrategy`]: How the memories are filled when a machine is created or reset.
//!
//! Both memories can be indexed directly. Direct indexing never triggers
//! memory hooks; hooked accesses go through [`Machine::read`] and [`Machine::write`].
//!
//! [`Machine::read`]: super::Machine::read
//! [`Machine::write`]: super::Machine::write

use rand::rngs::StdRng;
use rand::Rng;

/// Start of the special-function-register region of internal memory.
pub const SFR_START: u8 = 0x80;

const DATA_LEN: usize = 1 << 8;
const XDATA_LEN: usize = 1 << 16;

/// Trait that describes types that can produce the initial contents of a memory cell.
pub trait ByteFiller {
    /// Generate the data.
    fn generate(&mut self) -> u8;
}
impl ByteFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u8 {
        rand::random()
    }
}
impl ByteFiller for u8 {
    /// Sets each cell to the given value.
    fn generate(&mut self) -> u8 {
        *self
    }
}
impl ByteFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u8 {
        self.gen()
    }
}

/// Strategy used to initialize the internal and external memory of the [`Machine`].
///
/// Only the general-purpose half of internal memory (`0x00..0x80`) and the external memory
/// are filled with this strategy. The SFR region always starts zeroed.
///
/// [`Machine`]: super::Machine
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum MemInitStrategy {
    /// Every cell starts at zero.
    #[default]
    Zeroed,

    /// Initializes each cell randomly and non-deterministically.
    Unseeded,

    /// Initializes each cell randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each cell to a known value.
    Known {
        /// The value to initialize each cell to.
        value: u8
    }
}

impl MemInitStrategy {
    pub(super) fn generator(&self) -> impl ByteFiller {
        use rand::SeedableRng;

        match self {
            MemInitStrategy::Zeroed => Filler::Known(0),
            MemInitStrategy::Unseeded => Filler::Unseeded,
            MemInitStrategy::Seeded { seed } => Filler::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MemInitStrategy::Known { value } => Filler::Known(*value),
        }
    }
}

enum Filler {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u8)
}
impl ByteFiller for Filler {
    fn generate(&mut self) -> u8 {
        match self {
            Filler::Unseeded  => ().generate(),
            Filler::Seeded(r) => r.generate(),
            Filler::Known(k)  => k.generate(),
        }
    }
}

/// Internal data memory.
///
/// This can be indexed with any `u8` address.
///
/// ```
/// use mcs51_sim::sim::mem::DataMem;
///
/// let mut data = DataMem::new(&mut 0u8);
/// data[0x30] = 0x11;
/// assert_eq!(data[0x30], 0x11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMem([u8; DATA_LEN]);
impl DataMem {
    /// Creates a new internal memory, filling the general-purpose region with the filler.
    pub fn new(filler: &mut impl ByteFiller) -> Self {
        let mut cells = [0; DATA_LEN];
        cells[..usize::from(SFR_START)].fill_with(|| filler.generate());
        Self(cells)
    }

    /// The memory as a slice, indexed by address.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
    /// The memory as a mutable slice, indexed by address.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}
impl std::ops::Index<u8> for DataMem {
    type Output = u8;

    fn index(&self, index: u8) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<u8> for DataMem {
    fn index_mut(&mut self, index: u8) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

/// External data memory.
///
/// This can be addressed with any `u16` (16-bit address).
/// Note that this is held in the heap, as it is too large for the stack.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtMem(Box<[u8; XDATA_LEN]>);
impl ExtMem {
    /// Creates a new external memory with a provided fill strategy.
    pub fn new(filler: &mut impl ByteFiller) -> Self {
        let cells = std::iter::repeat_with(|| filler.generate())
            .take(XDATA_LEN)
            .collect::<Box<[u8]>>()
            .try_into()
            .unwrap_or_else(|_| unreachable!("iterator should have had {XDATA_LEN} elements"));

        Self(cells)
    }

    /// The memory as a slice, indexed by address.
    pub fn as_slice(&self) -> &[u8] {
        &*self.0
    }
    /// The memory as a mutable slice, indexed by address.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut *self.0
    }
}
impl std::fmt::Debug for ExtMem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtMem")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}
impl std::ops::Index<u16> for ExtMem {
    type Output = u8;

    fn index(&self, index: u16) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<u16> for ExtMem {
    fn index_mut(&mut self, index: u16) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}
