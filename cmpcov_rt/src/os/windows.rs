//! Executable image lookup through the Win32 module APIs.

use std::mem::size_of;

use windows::{
    core::PCSTR,
    Win32::{
        Foundation::{HMODULE, MAX_PATH},
        System::{
            LibraryLoader::{
                GetModuleFileNameW, GetModuleHandleExA, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
                GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            },
            ProcessStatus::{K32GetModuleInformation, MODULEINFO},
            Threading::GetCurrentProcess,
        },
    },
};

use crate::modules::ModuleInfo;

/// Returns the image containing `address` according to the loader.
///
/// Any failing API call along the way is a clean not-found, never fatal.
pub(crate) fn image_at(address: usize) -> Option<ModuleInfo> {
    unsafe {
        // Translate the instruction address to an image handle, without bumping its refcount.
        let mut hmodule = HMODULE::default();
        GetModuleHandleExA(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            PCSTR(address as *const u8),
            &mut hmodule,
        )
        .ok()?;

        let mut modinfo = MODULEINFO::default();
        if !K32GetModuleInformation(
            GetCurrentProcess(),
            hmodule,
            &mut modinfo,
            size_of::<MODULEINFO>() as u32,
        )
        .as_bool()
        {
            return None;
        }

        let mut filepath = [0u16; MAX_PATH as usize];
        let len = GetModuleFileNameW(hmodule, &mut filepath);
        if len == 0 {
            return None;
        }
        let path = String::from_utf16_lossy(&filepath[..len as usize]);
        let name = path.rsplit('\\').next().unwrap_or(&path).to_string();

        Some(ModuleInfo {
            base: modinfo.lpBaseOfDll as usize,
            size: modinfo.SizeOfImage as usize,
            name,
        })
    }
}
