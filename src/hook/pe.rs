//! PE image headers and import descriptors
//!
//! Header parsing works on a byte copy of the first page of an image, so the
//! same code classifies a module in this process and an image read out of a
//! child. Import walking reads the live, mapped image through its base pointer.

use std::ffi::CStr;

pub const DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
pub const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
pub const OPTIONAL_MAGIC_32: u16 = 0x10B;
pub const OPTIONAL_MAGIC_64: u16 = 0x20B;
pub const MACHINE_I386: u16 = 0x014C;
pub const MACHINE_AMD64: u16 = 0x8664;
pub const SUBSYSTEM_WINDOWS_CUI: u16 = 3;

/// Bytes of an image read for header parsing.
pub const HEADER_SPAN: usize = 0x1000;

const E_LFANEW: usize = 0x3C;
const FILE_HEADER: usize = 4;
const OPTIONAL_HEADER: usize = FILE_HEADER + 20;
const SUBSYSTEM: usize = 68;
const DIRECTORY_ENTRY_IMPORT: usize = 1;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// Pointer width of an image or process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Bits32,
    Bits64,
}

impl Width {
    /// Width of the running engine.
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Width::Bits64
        } else {
            Width::Bits32
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Width::Bits32 => 32,
            Width::Bits64 => 64,
        }
    }

    pub fn optional_magic(self) -> u16 {
        match self {
            Width::Bits32 => OPTIONAL_MAGIC_32,
            Width::Bits64 => OPTIONAL_MAGIC_64,
        }
    }

    pub fn from_machine(machine: u16) -> Option<Self> {
        match machine {
            MACHINE_I386 => Some(Width::Bits32),
            MACHINE_AMD64 => Some(Width::Bits64),
            _ => None,
        }
    }
}

impl std::fmt::Display for Width {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

/// Fields of the DOS/NT headers the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeaders {
    pub machine: u16,
    pub magic: u16,
    pub subsystem: u16,
    pub imports: DataDirectory,
}

fn u16_at(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

impl ImageHeaders {
    /// Parse the headers at the start of `bytes`. `None` unless both the
    /// `MZ` and `PE` signatures are present.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if u16_at(bytes, 0)? != DOS_SIGNATURE {
            return None;
        }
        let nt = u32_at(bytes, E_LFANEW)? as usize;
        if u32_at(bytes, nt)? != NT_SIGNATURE {
            return None;
        }

        let machine = u16_at(bytes, nt + FILE_HEADER)?;
        let optional = nt + OPTIONAL_HEADER;
        let magic = u16_at(bytes, optional)?;
        let subsystem = u16_at(bytes, optional + SUBSYSTEM)?;

        // PE32 and PE32+ differ only in where the directory count sits.
        let (count_at, dirs_at) = match magic {
            OPTIONAL_MAGIC_32 => (92, 96),
            OPTIONAL_MAGIC_64 => (108, 112),
            _ => return None,
        };
        let count = u32_at(bytes, optional + count_at)? as usize;
        let imports = if count > DIRECTORY_ENTRY_IMPORT {
            let entry = optional + dirs_at + DIRECTORY_ENTRY_IMPORT * 8;
            DataDirectory {
                rva: u32_at(bytes, entry)?,
                size: u32_at(bytes, entry + 4)?,
            }
        } else {
            DataDirectory::default()
        };

        Some(Self {
            machine,
            magic,
            subsystem,
            imports,
        })
    }

    /// Width implied by the optional header.
    pub fn width(&self) -> Option<Width> {
        match self.magic {
            OPTIONAL_MAGIC_32 => Some(Width::Bits32),
            OPTIONAL_MAGIC_64 => Some(Width::Bits64),
            _ => None,
        }
    }

    pub fn is_console(&self) -> bool {
        self.subsystem == SUBSYSTEM_WINDOWS_CUI
    }
}

/// One entry of an image's import directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    /// Name of the module the symbols are imported from.
    pub module: String,
    /// RVA of the resolved slot array.
    pub first_thunk: u32,
}

/// Read the import descriptors of the image mapped at `base`.
///
/// # Safety
/// `base` must point to a mapped image whose headers were parsed into
/// `headers`, with the import directory and the names it references readable.
pub unsafe fn import_descriptors(base: *const u8, headers: &ImageHeaders) -> Vec<ImportDescriptor> {
    let mut out = Vec::new();
    if headers.imports.rva == 0 {
        return out;
    }

    let mut entry = base.add(headers.imports.rva as usize);
    loop {
        let name_rva = entry.add(12).cast::<u32>().read_unaligned();
        if name_rva == 0 {
            break;
        }
        let first_thunk = entry.add(16).cast::<u32>().read_unaligned();
        let name = CStr::from_ptr(base.add(name_rva as usize).cast());
        out.push(ImportDescriptor {
            module: name.to_string_lossy().into_owned(),
            first_thunk,
        });
        entry = entry.add(IMPORT_DESCRIPTOR_SIZE);
    }
    out
}

/// Addresses of the non-empty slots in the array at `first_thunk`.
///
/// # Safety
/// `base` must be a mapped image and `first_thunk` the RVA of a
/// zero-terminated array of pointer-sized slots within it.
pub unsafe fn import_slots(base: *mut u8, first_thunk: u32) -> Vec<*mut usize> {
    let mut slots = Vec::new();
    let mut slot = base.add(first_thunk as usize).cast::<usize>();
    while slot.read_unaligned() != 0 {
        slots.push(slot);
        slot = slot.add(1);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::testing::ImageBuilder;

    #[test]
    fn test_parse_native_image() {
        let image = ImageBuilder::native().import("kernel32.dll", &[0x10, 0x20]).build();
        let headers = ImageHeaders::parse(&image.bytes).unwrap();
        assert_eq!(headers.width(), Some(Width::native()));
        assert!(headers.is_console());
        assert_ne!(headers.imports.rva, 0);
    }

    #[test]
    fn test_parse_rejects_bad_signatures() {
        let mut image = ImageBuilder::native().build();
        image.bytes[0] = b'X';
        assert_eq!(ImageHeaders::parse(&image.bytes), None);

        let mut image = ImageBuilder::native().build();
        image.bytes[0x80] = b'N';
        assert_eq!(ImageHeaders::parse(&image.bytes), None);
    }

    #[test]
    fn test_parse_truncated() {
        let image = ImageBuilder::native().build();
        assert_eq!(ImageHeaders::parse(&image.bytes[..0x90]), None);
        assert_eq!(ImageHeaders::parse(&[]), None);
    }

    #[test]
    fn test_classify_foreign_images() {
        let gui32 = ImageBuilder::new(MACHINE_I386, OPTIONAL_MAGIC_32).subsystem(2).build();
        let headers = ImageHeaders::parse(&gui32.bytes).unwrap();
        assert_eq!(headers.width(), Some(Width::Bits32));
        assert_eq!(Width::from_machine(headers.machine), Some(Width::Bits32));
        assert!(!headers.is_console());

        let arm = ImageBuilder::new(0xAA64, OPTIONAL_MAGIC_64).build();
        let headers = ImageHeaders::parse(&arm.bytes).unwrap();
        assert_eq!(Width::from_machine(headers.machine), None);
    }

    #[test]
    fn test_walk_imports() {
        let mut image = ImageBuilder::native()
            .import("KERNEL32.dll", &[0x10, 0x20, 0x30])
            .import("user32.dll", &[0x40])
            .build();
        let headers = ImageHeaders::parse(&image.bytes).unwrap();
        let base = image.base();
        let descriptors = unsafe { import_descriptors(base, &headers) };
        let names: Vec<&str> = descriptors.iter().map(|d| d.module.as_str()).collect();
        assert_eq!(names, vec!["KERNEL32.dll", "user32.dll"]);

        let slots = unsafe { import_slots(base, descriptors[0].first_thunk) };
        let values: Vec<usize> = slots.iter().map(|s| unsafe { s.read_unaligned() }).collect();
        assert_eq!(values, vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_no_import_directory() {
        let image = ImageBuilder::native().build();
        let headers = ImageHeaders::parse(&image.bytes).unwrap();
        assert_eq!(headers.imports.rva, 0);
        assert!(unsafe { import_descriptors(image.bytes.as_ptr(), &headers) }.is_empty());
    }
}
