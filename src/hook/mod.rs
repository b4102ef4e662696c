//! Import table hook engine
//!
//! - **pe**: image header parsing and import directory walking
//! - **table**: hooked entry points and the system module allow-list
//! - **patch**: the single-slot write primitive
//! - **engine**: module and process-wide patch passes

pub mod engine;
pub mod patch;
pub mod pe;
pub mod table;

use thiserror::Error;

pub use engine::{patch_module, patch_modules, ModuleRef};
pub use patch::SlotWriter;
pub use pe::{ImageHeaders, Width};
pub use table::{HookId, HookSpec, HookTable};

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Not a loadable image at {0:#x}")]
    InvalidImage(usize),

    #[error("Failed to change protection at {addr:#x}: {reason}")]
    Protect { addr: usize, reason: String },

    #[error("Failed to write import slot at {0:#x}")]
    Write(usize),

    #[error("Failed to enumerate modules: {0}")]
    Snapshot(String),

    #[error("{failed} import slot(s) could not be written")]
    SlotsFailed { failed: usize },
}

#[cfg(test)]
pub(crate) mod testing {
    //! Synthetic PE images laid out in a byte buffer.

    use super::pe::{MACHINE_AMD64, MACHINE_I386, OPTIONAL_MAGIC_32, OPTIONAL_MAGIC_64, SUBSYSTEM_WINDOWS_CUI};
    use super::Width;

    const IMAGE_SIZE: usize = 0x2000;
    const NT: usize = 0x80;
    const DESCRIPTORS: usize = 0x400;
    const NAMES: usize = 0x600;
    const THUNKS: usize = 0x800;
    const THUNK_STRIDE: usize = 0x100;

    pub struct ImageBuilder {
        machine: u16,
        magic: u16,
        subsystem: u16,
        imports: Vec<(String, Vec<usize>)>,
    }

    impl ImageBuilder {
        pub fn new(machine: u16, magic: u16) -> Self {
            Self {
                machine,
                magic,
                subsystem: SUBSYSTEM_WINDOWS_CUI,
                imports: Vec::new(),
            }
        }

        /// Console image matching the width of the test process.
        pub fn native() -> Self {
            match Width::native() {
                Width::Bits32 => Self::new(MACHINE_I386, OPTIONAL_MAGIC_32),
                Width::Bits64 => Self::new(MACHINE_AMD64, OPTIONAL_MAGIC_64),
            }
        }

        pub fn subsystem(mut self, subsystem: u16) -> Self {
            self.subsystem = subsystem;
            self
        }

        pub fn import(mut self, module: &str, slots: &[usize]) -> Self {
            self.imports.push((module.to_string(), slots.to_vec()));
            self
        }

        pub fn build(self) -> SyntheticImage {
            let mut bytes = vec![0u8; IMAGE_SIZE];
            let put16 = |b: &mut Vec<u8>, at: usize, v: u16| b[at..at + 2].copy_from_slice(&v.to_le_bytes());
            let put32 = |b: &mut Vec<u8>, at: usize, v: u32| b[at..at + 4].copy_from_slice(&v.to_le_bytes());

            bytes[0..2].copy_from_slice(b"MZ");
            put32(&mut bytes, 0x3C, NT as u32);
            bytes[NT..NT + 4].copy_from_slice(b"PE\0\0");
            put16(&mut bytes, NT + 4, self.machine);

            let optional = NT + 24;
            let (size, count_at, dirs_at) = if self.magic == OPTIONAL_MAGIC_64 {
                (0xF0, 108, 112)
            } else {
                (0xE0, 92, 96)
            };
            put16(&mut bytes, NT + 4 + 16, size);
            put16(&mut bytes, optional, self.magic);
            put16(&mut bytes, optional + 68, self.subsystem);
            put32(&mut bytes, optional + count_at, 16);

            let mut thunks = Vec::new();
            if !self.imports.is_empty() {
                let entry = optional + dirs_at + 8;
                put32(&mut bytes, entry, DESCRIPTORS as u32);
                put32(&mut bytes, entry + 4, (20 * (self.imports.len() + 1)) as u32);
            }
            for (i, (module, slots)) in self.imports.iter().enumerate() {
                let descriptor = DESCRIPTORS + 20 * i;
                let name = NAMES + 0x40 * i;
                let thunk = THUNKS + THUNK_STRIDE * i;
                bytes[name..name + module.len()].copy_from_slice(module.as_bytes());
                put32(&mut bytes, descriptor + 12, name as u32);
                put32(&mut bytes, descriptor + 16, thunk as u32);
                for (j, value) in slots.iter().enumerate() {
                    let at = thunk + j * std::mem::size_of::<usize>();
                    bytes[at..at + std::mem::size_of::<usize>()].copy_from_slice(&value.to_ne_bytes());
                }
                thunks.push(thunk);
            }

            SyntheticImage { bytes, thunks }
        }
    }

    pub struct SyntheticImage {
        pub bytes: Vec<u8>,
        thunks: Vec<usize>,
    }

    impl SyntheticImage {
        pub fn base(&mut self) -> *mut u8 {
            self.bytes.as_mut_ptr()
        }

        /// Current values of the slot array of import `index`.
        pub fn slot_values(&self, index: usize) -> Vec<usize> {
            const WORD: usize = std::mem::size_of::<usize>();
            let mut values = Vec::new();
            let mut at = self.thunks[index];
            loop {
                let mut raw = [0u8; WORD];
                raw.copy_from_slice(&self.bytes[at..at + WORD]);
                let value = usize::from_ne_bytes(raw);
                if value == 0 {
                    return values;
                }
                values.push(value);
                at += WORD;
            }
        }
    }
}
