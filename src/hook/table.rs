//! Hooked entry points and the system modules they are imported from.

/// Modules whose imports are considered for patching. The first entry is the
/// core system module; the rest are API sets that forward to it.
pub const SYSTEM_MODULES: [&str; 6] = [
    "kernel32.dll",
    "API-MS-Win-Core-Console-L1-1-0.dll",
    "API-MS-Win-Core-ProcessThreads-L1-1-0.dll",
    "API-MS-Win-Core-ProcessEnvironment-L1-1-0.dll",
    "API-MS-Win-Core-LibraryLoader-L1-1-0.dll",
    "API-MS-Win-Core-File-L1-1-0.dll",
];

/// Index of `name` in [`SYSTEM_MODULES`], compared case-insensitively.
pub fn system_module_index(name: &str) -> Option<usize> {
    SYSTEM_MODULES.iter().position(|m| m.eq_ignore_ascii_case(name))
}

/// Every entry point the engine replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookId {
    CreateProcessA,
    CreateProcessW,
    GetEnvironmentVariableA,
    GetEnvironmentVariableW,
    LoadLibraryA,
    LoadLibraryW,
    LoadLibraryExA,
    LoadLibraryExW,
    WriteConsoleA,
    WriteConsoleW,
    WriteFile,
}

impl HookId {
    pub const ALL: [HookId; 11] = [
        HookId::CreateProcessA,
        HookId::CreateProcessW,
        HookId::GetEnvironmentVariableA,
        HookId::GetEnvironmentVariableW,
        HookId::LoadLibraryA,
        HookId::LoadLibraryW,
        HookId::LoadLibraryExA,
        HookId::LoadLibraryExW,
        HookId::WriteConsoleA,
        HookId::WriteConsoleW,
        HookId::WriteFile,
    ];

    /// Exported symbol name.
    pub fn symbol(self) -> &'static str {
        match self {
            HookId::CreateProcessA => "CreateProcessA",
            HookId::CreateProcessW => "CreateProcessW",
            HookId::GetEnvironmentVariableA => "GetEnvironmentVariableA",
            HookId::GetEnvironmentVariableW => "GetEnvironmentVariableW",
            HookId::LoadLibraryA => "LoadLibraryA",
            HookId::LoadLibraryW => "LoadLibraryW",
            HookId::LoadLibraryExA => "LoadLibraryExA",
            HookId::LoadLibraryExW => "LoadLibraryExW",
            HookId::WriteConsoleA => "WriteConsoleA",
            HookId::WriteConsoleW => "WriteConsoleW",
            HookId::WriteFile => "WriteFile",
        }
    }

    /// API set that may export the symbol on newer systems.
    pub fn api_set(self) -> &'static str {
        let index = match self {
            HookId::WriteConsoleA | HookId::WriteConsoleW => 1,
            HookId::CreateProcessA | HookId::CreateProcessW => 2,
            HookId::GetEnvironmentVariableA | HookId::GetEnvironmentVariableW => 3,
            HookId::LoadLibraryA
            | HookId::LoadLibraryW
            | HookId::LoadLibraryExA
            | HookId::LoadLibraryExW => 4,
            HookId::WriteFile => 5,
        };
        SYSTEM_MODULES[index]
    }
}

/// One replaced entry point. Addresses are plain integers so the table can
/// be built and matched without touching any code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSpec {
    pub id: HookId,
    pub replacement: usize,
    /// Address exported by the core system module.
    pub original: usize,
    /// Address exported by the API set, when it differs.
    pub fallback: Option<usize>,
}

impl HookSpec {
    /// True when a slot holding `value` should be redirected.
    pub fn is_original(&self, value: usize) -> bool {
        value == self.original || self.fallback == Some(value)
    }
}

/// Process-wide set of hooks, built once at attach.
#[derive(Debug, Clone, Default)]
pub struct HookTable {
    specs: Vec<HookSpec>,
}

impl HookTable {
    pub fn new(specs: Vec<HookSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[HookSpec] {
        &self.specs
    }

    pub fn get(&self, id: HookId) -> Option<&HookSpec> {
        self.specs.iter().find(|s| s.id == id)
    }

    /// Address to call for the real implementation of `id`.
    pub fn original(&self, id: HookId) -> Option<usize> {
        self.get(id).map(|s| s.original)
    }

    /// New value for a slot currently holding `current`, in the import list of
    /// system module `import` (an index into [`SYSTEM_MODULES`]); `None` if
    /// the slot is left alone.
    pub fn patch_target(&self, current: usize, import: usize, restoring: bool) -> Option<usize> {
        self.specs.iter().find_map(|spec| {
            if restoring {
                if current != spec.replacement {
                    return None;
                }
                // Modules bound to an API set get the API set's export back.
                Some(if import == 0 {
                    spec.original
                } else {
                    spec.fallback.unwrap_or(spec.original)
                })
            } else if spec.is_original(current) {
                Some(spec.replacement)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HookTable {
        HookTable::new(vec![
            HookSpec {
                id: HookId::WriteConsoleW,
                replacement: 0xA000,
                original: 0x1000,
                fallback: Some(0x2000),
            },
            HookSpec {
                id: HookId::WriteFile,
                replacement: 0xB000,
                original: 0x3000,
                fallback: None,
            },
        ])
    }

    #[test]
    fn test_system_module_lookup() {
        assert_eq!(system_module_index("KERNEL32.DLL"), Some(0));
        assert_eq!(system_module_index("api-ms-win-core-file-l1-1-0.dll"), Some(5));
        assert_eq!(system_module_index("user32.dll"), None);
    }

    #[test]
    fn test_api_sets_are_system_modules() {
        for id in HookId::ALL {
            assert!(system_module_index(id.api_set()).is_some_and(|i| i > 0), "{id:?}");
        }
    }

    #[test]
    fn test_hook_matches_original_and_fallback() {
        let table = table();
        assert_eq!(table.patch_target(0x1000, 0, false), Some(0xA000));
        assert_eq!(table.patch_target(0x2000, 1, false), Some(0xA000));
        assert_eq!(table.patch_target(0x3000, 5, false), Some(0xB000));
        assert_eq!(table.patch_target(0x4000, 0, false), None);
        assert_eq!(table.patch_target(0xA000, 0, false), None);
    }

    #[test]
    fn test_restore_depends_on_import_module() {
        let table = table();
        assert_eq!(table.patch_target(0xA000, 0, true), Some(0x1000));
        assert_eq!(table.patch_target(0xA000, 1, true), Some(0x2000));
        assert_eq!(table.patch_target(0xB000, 5, true), Some(0x3000));
        assert_eq!(table.patch_target(0x1000, 0, true), None);
    }

    #[test]
    fn test_original_lookup() {
        let table = table();
        assert_eq!(table.original(HookId::WriteFile), Some(0x3000));
        assert_eq!(table.original(HookId::LoadLibraryW), None);
    }
}
