//! The [`Traces`] store deduplicates comparison events and encodes them into the compact
//! per-module trace values consumed by the fuzzing frontend.

use hashbrown::HashSet;

use crate::{
    die,
    modules::{ImageLookup, Modules},
    os::OsImages,
};

/// Bit width of the module-relative offset field of a wide trace.
pub const TRACE_OFFSET_BITS: u32 = 48;
/// Bit width of the secondary caller tag of a wide trace.
pub const TRACE_ARG2_BITS: u32 = 12;
/// Bit width of the primary caller tag of a wide trace.
pub const TRACE_ARG1_BITS: u32 = 4;

const OFFSET_MASK: u64 = (1 << TRACE_OFFSET_BITS) - 1;
const ARG2_MASK: u64 = (1 << TRACE_ARG2_BITS) - 1;
const ARG1_MASK: u64 = (1 << TRACE_ARG1_BITS) - 1;

/// One deduplicated comparison event, ready to be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    /// Index of the containing module in the store's module table.
    pub module: usize,
    /// The encoded output trace, see [`output_trace`].
    pub trace: usize,
}

/// Packs a module-relative offset and two caller tags into the wide (64-bit) trace form.
///
/// The layout is:
///
/// * bits 60..=63: `arg1`,
/// * bits 48..=59: `arg2`,
/// * bits 0..=47: module-relative offset.
///
/// Oversized inputs are masked to their field width, so a bad tag can never leak into a
/// neighboring field.
#[must_use]
pub fn wide_trace(offset: usize, arg1: u32, arg2: u32) -> u64 {
    (offset as u64 & OFFSET_MASK)
        | ((u64::from(arg2) & ARG2_MASK) << TRACE_OFFSET_BITS)
        | ((u64::from(arg1) & ARG1_MASK) << (TRACE_OFFSET_BITS + TRACE_ARG2_BITS))
}

/// Encodes a wide trace into the form actually stored and emitted.
///
/// On 64-bit targets this is the wide trace itself. On 32-bit targets the word is too narrow
/// to hold the full packed value, so the wide trace is hashed down to 32 bits; collisions
/// become possible but are minimized by the full-avalanche mix.
#[must_use]
pub fn output_trace(wide: u64) -> usize {
    #[cfg(target_pointer_width = "64")]
    {
        wide as usize
    }
    #[cfg(not(target_pointer_width = "64"))]
    {
        hash_64_32_shift(wide) as usize
    }
}

/// 64-bit to 32-bit hash function by Thomas Wang.
///
/// Downstream tooling correlates traces by this value, so it has to stay bit-for-bit stable
/// across runs and platforms.
#[must_use]
pub fn hash_64_32_shift(mut key: u64) -> u32 {
    key = (!key).wrapping_add(key << 18);
    key ^= key >> 31;
    key = key.wrapping_mul(21);
    key ^= key >> 11;
    key = key.wrapping_add(key << 6);
    key ^= key >> 22;
    key as u32
}

/// Accumulator for deduplicated comparison traces.
///
/// Grows monotonically; the accessors are safe to call at any time, interleaved with
/// [`Traces::try_save_trace`]. A single store assumes a single logical recorder; a
/// multithreaded embedder wraps it in its own lock or keeps one store per thread and merges
/// afterwards.
#[derive(Debug, Default)]
pub struct Traces<L = OsImages> {
    modules: Modules<L>,
    seen: HashSet<u64>,
    records: Vec<TraceRecord>,
}

impl Traces<OsImages> {
    /// Creates a store resolving addresses against the operating system's memory map.
    #[must_use]
    pub fn new() -> Self {
        Self::with_modules(Modules::new())
    }
}

impl<L> Traces<L>
where
    L: ImageLookup,
{
    /// Creates a store on top of an existing module registry.
    pub fn with_modules(modules: Modules<L>) -> Self {
        Self {
            modules,
            seen: HashSet::new(),
            records: Vec::new(),
        }
    }

    /// Records one comparison event at `pc`, tagged with `arg1` (4 bits, e.g. the number of
    /// matching bytes) and `arg2` (12 bits).
    ///
    /// Repeated events with the same identity are a no-op. Instrumented code always lies
    /// inside a known image; an unresolvable `pc` indicates a tracing bug or unsupported
    /// JIT/unmapped code and kills the process.
    pub fn try_save_trace(&mut self, pc: usize, arg1: u32, arg2: u32) {
        let Some(module) = self.modules.index_of(pc) else {
            die(&format!(
                "failed to translate address {pc:x} to an executable image, aborting"
            ));
        };

        let offset = pc - self.modules.base(module);
        let wide = wide_trace(offset, arg1, arg2);

        // One record per distinct (offset, arg1, arg2), in first-occurrence order.
        if !self.seen.insert(wide) {
            return;
        }

        self.records.push(TraceRecord {
            module,
            trace: output_trace(wide),
        });
    }

    /// Returns the number of modules the recorded traces refer to.
    #[must_use]
    pub fn modules_count(&self) -> usize {
        self.modules.count()
    }

    /// Returns the name of the module associated with the given index.
    #[must_use]
    pub fn module_name(&self, idx: usize) -> &str {
        self.modules.name(idx)
    }

    /// The deduplicated records, in the order their comparisons were first observed.
    #[must_use]
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }
}
