//! `cmpcov_rt` contains the runtime core of a comparison-coverage collector, linked into the
//! instrumented target itself.
//!
//! Instrumented comparison call sites invoke [`Traces::try_save_trace`] with the address of the
//! comparison and two small tags describing it (for example the number of matching bytes).
//! The store resolves the address to a loaded executable image through [`Modules`], packs the
//! module-relative offset and the tags into a compact trace value, and keeps one record per
//! distinct trace, in first-occurrence order. An external writer reads the module table and the
//! record list back out and serializes them; no file I/O happens here.
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]
#![cfg_attr(test, deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_must_use,
))]

pub mod modules;
pub use modules::*;
pub mod os;
pub mod traces;
pub use traces::*;

/// Magic value at the beginning of 64-bit sancov trace files.
///
/// See <https://clang.llvm.org/docs/SanitizerCoverage.html#sancov-data-format>.
pub const SANCOV_MAGIC_64: u64 = 0xC0BF_FFFF_FFFF_FF64;
/// Magic value at the beginning of 32-bit sancov trace files.
pub const SANCOV_MAGIC_32: u64 = 0xC0BF_FFFF_FFFF_FF32;

/// The sancov magic matching the word size of the current target.
#[cfg(target_pointer_width = "64")]
pub const SANCOV_MAGIC: u64 = SANCOV_MAGIC_64;
/// The sancov magic matching the word size of the current target.
#[cfg(not(target_pointer_width = "64"))]
pub const SANCOV_MAGIC: u64 = SANCOV_MAGIC_32;

/// Maximum length of instrumented string/memory buffers in calls to `strcmp()`, `strncmp()`
/// and `memcmp()`.
pub const MAX_DATA_CMP_LEN: usize = 32;

/// `arg1` tag for traces corresponding to memory comparisons. It is set to 15, a reserved
/// number that will never appear as the number of matching bytes of a single-variable
/// comparison (which is limited to 8).
pub const MEMCMP_TRACE_ARG1: u32 = 15;

/// Kills the process instantly on a critical error, without unwinding or cleanup.
///
/// Continuing past either fatal condition (unreadable memory map, unresolvable pc) would
/// silently produce corrupt trace data.
pub(crate) fn die(msg: &str) -> ! {
    log::error!("{msg}");
    eprintln!("{msg}");
    #[cfg(unix)]
    unsafe {
        libc::_exit(1)
    }
    #[cfg(not(unix))]
    {
        std::process::abort()
    }
}
