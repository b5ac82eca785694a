//! Platform-specific lookup of loaded executable images.
//!
//! Each platform answers the same one question: given an address, which mapped executable
//! image contains it? Everything else (caching, index assignment) is platform-agnostic and
//! lives in [`crate::modules`].

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod linux;
#[cfg(windows)]
pub mod windows;

use crate::modules::{ImageLookup, ModuleInfo};

/// Image lookup backed by the operating system's own view of the process mappings.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsImages;

impl ImageLookup for OsImages {
    #[allow(unused_variables)]
    fn image_at(&mut self, address: usize) -> Option<ModuleInfo> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            linux::image_at(address)
        }
        #[cfg(windows)]
        {
            windows::image_at(address)
        }
        #[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
        {
            None
        }
    }
}
