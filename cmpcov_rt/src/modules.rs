//! The [`Modules`] registry keeps track of executable images loaded in the address space of
//! the local process, and translates virtual addresses into the base+offset form.

use crate::os::OsImages;

/// A descriptor of an executable module in the process address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Base address the image is loaded at.
    pub base: usize,
    /// Size of the mapped image, in bytes.
    pub size: usize,
    /// Display name, the final component of the backing path.
    pub name: String,
}

impl ModuleInfo {
    /// Whether `address` falls into this image's `[base, base + size)` range.
    #[must_use]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.base + self.size
    }
}

/// Looks up the executable image containing a given address.
///
/// [`OsImages`] implements this against the operating system's own view of the process
/// mappings; tests substitute a fake. The resolver policy in [`Modules`] is the same either
/// way.
pub trait ImageLookup {
    /// Returns the image containing `address`, or `None` if no mapped executable region
    /// contains it.
    fn image_at(&mut self, address: usize) -> Option<ModuleInfo>;
}

/// Registry of loaded executable images, populated lazily on first address resolution.
///
/// Indices are assigned in discovery order and stay valid for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct Modules<L = OsImages> {
    lookup: L,
    cached: Vec<ModuleInfo>,
    last_idx: Option<usize>,
}

impl Modules<OsImages> {
    /// Creates a registry backed by the operating system's memory-map data.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(OsImages)
    }
}

impl<L> Modules<L>
where
    L: ImageLookup,
{
    /// Creates a registry backed by a custom image lookup.
    pub fn with_lookup(lookup: L) -> Self {
        Self {
            lookup,
            cached: Vec::new(),
            last_idx: None,
        }
    }

    /// Translates an address to a module index recognized by this registry.
    ///
    /// Returns `None` if no mapped executable region contains the address.
    pub fn index_of(&mut self, address: usize) -> Option<usize> {
        // Check the previously returned index first as an optimization.
        if let Some(idx) = self.last_idx {
            if self.cached[idx].contains(address) {
                return Some(idx);
            }
        }

        // We don't expect the traced process to consist of many instrumented modules jumping
        // between themselves, so a slow but simple O(n) search is enough here.
        for (idx, module) in self.cached.iter().enumerate() {
            if module.contains(address) {
                self.last_idx = Some(idx);
                return Some(idx);
            }
        }

        // Not in the cache, ask the operating system about the new module.
        let module = self.lookup.image_at(address)?;
        log::debug!(
            "new module {} at {:#x} (size {:#x})",
            module.name,
            module.base,
            module.size
        );
        self.cached.push(module);
        let idx = self.cached.len() - 1;
        self.last_idx = Some(idx);
        Some(idx)
    }

    /// Returns the total number of modules cached by this registry.
    #[must_use]
    pub fn count(&self) -> usize {
        self.cached.len()
    }

    /// Returns the base address of the image associated with the given index.
    #[must_use]
    pub fn base(&self, idx: usize) -> usize {
        self.cached[idx].base
    }

    /// Returns the name of the image associated with the given index.
    #[must_use]
    pub fn name(&self, idx: usize) -> &str {
        &self.cached[idx].name
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageLookup, ModuleInfo, Modules};

    /// Fake lookup over a fixed set of images, counting how often the "OS" gets asked.
    struct CountingLookup {
        images: Vec<ModuleInfo>,
        queries: usize,
    }

    impl ImageLookup for CountingLookup {
        fn image_at(&mut self, address: usize) -> Option<ModuleInfo> {
            self.queries += 1;
            self.images.iter().find(|m| m.contains(address)).cloned()
        }
    }

    fn two_images() -> CountingLookup {
        CountingLookup {
            images: vec![
                ModuleInfo {
                    base: 0x10000,
                    size: 0x4000,
                    name: "libfoo.so".to_string(),
                },
                ModuleInfo {
                    base: 0x7f00_0000_0000,
                    size: 0x2000,
                    name: "libbar.so".to_string(),
                },
            ],
            queries: 0,
        }
    }

    #[test]
    fn test_resolution_stability() {
        let mut modules = Modules::with_lookup(two_images());
        let first = modules.index_of(0x10010).unwrap();
        assert_eq!(modules.index_of(0x10010).unwrap(), first);
        // Another address inside the same image maps to the same index.
        assert_eq!(modules.index_of(0x13fff).unwrap(), first);
        assert_eq!(modules.count(), 1);
        assert_eq!(modules.base(first), 0x10000);
        assert_eq!(modules.name(first), "libfoo.so");
    }

    #[test]
    fn test_fast_path_skips_os_query() {
        let mut modules = Modules::with_lookup(two_images());
        assert_eq!(modules.index_of(0x10010), Some(0));
        assert_eq!(modules.lookup.queries, 1);
        // Consecutive hits in the same hot module never go back to the OS.
        assert_eq!(modules.index_of(0x10020), Some(0));
        assert_eq!(modules.index_of(0x11000), Some(0));
        assert_eq!(modules.lookup.queries, 1);
    }

    #[test]
    fn test_indices_are_append_only() {
        let mut modules = Modules::with_lookup(two_images());
        assert_eq!(modules.index_of(0x10010), Some(0));
        assert_eq!(modules.index_of(0x7f00_0000_0100), Some(1));
        assert_eq!(modules.lookup.queries, 2);
        // Going back to the first module hits the cache scan, not a new OS query.
        assert_eq!(modules.index_of(0x10010), Some(0));
        assert_eq!(modules.lookup.queries, 2);
        assert_eq!(modules.count(), 2);
        assert_eq!(modules.name(1), "libbar.so");
    }

    #[test]
    fn test_unmapped_address_is_not_found() {
        let mut modules = Modules::with_lookup(two_images());
        assert_eq!(modules.index_of(0xdead_0000), None);
        assert_eq!(modules.count(), 0);
        // A later valid resolution is unaffected.
        assert_eq!(modules.index_of(0x10010), Some(0));
    }
}
