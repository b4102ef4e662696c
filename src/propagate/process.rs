//! Child process propagation
//!
//! Children are always created suspended. While suspended, the child's image
//! is located and classified, the engine is injected if it qualifies, and only
//! then is the primary thread resumed (unless the caller asked for a
//! suspended start itself).

use super::inject::{EnginePaths, Injector};
use super::InjectError;
use crate::hook::pe::{ImageHeaders, HEADER_SPAN};
use crate::hook::Width;

pub const CREATE_SUSPENDED: u32 = 0x0000_0004;

/// Creation flags actually passed to the real `CreateProcess`.
pub fn suspended_flags(flags: u32) -> u32 {
    flags | CREATE_SUSPENDED
}

/// One region of a child's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: usize,
    pub allocation_base: usize,
    pub size: usize,
}

/// The operations propagation needs on a freshly created, suspended child.
pub trait ChildProcess {
    /// The region containing `address`, or `None` past the end of the address space.
    fn query_region(&self, address: usize) -> Option<MemoryRegion>;

    /// Read into `buf`, returning the number of bytes read (0 on failure).
    fn read_memory(&self, address: usize, buf: &mut [u8]) -> usize;

    /// Resume the primary thread.
    fn resume(&self);
}

/// The child's executable image: the first allocation whose base carries
/// valid `MZ`/`PE` headers.
pub fn find_image<P: ChildProcess + ?Sized>(child: &P) -> Option<(usize, ImageHeaders)> {
    let mut header = vec![0u8; HEADER_SPAN];
    let mut address = 0usize;
    while let Some(region) = child.query_region(address) {
        let read = child.read_memory(region.allocation_base, &mut header);
        if let Some(headers) = ImageHeaders::parse(&header[..read]) {
            return Some((region.allocation_base, headers));
        }
        address = region
            .base
            .checked_add(region.size)
            .filter(|&next| next > address)?;
    }
    None
}

/// Width of a console image, or why it does not qualify.
pub fn classify(headers: &ImageHeaders) -> Result<Width, InjectError> {
    if !headers.is_console() {
        return Err(InjectError::NotConsole(headers.subsystem));
    }
    Width::from_machine(headers.machine).ok_or(InjectError::UnsupportedMachine(headers.machine))
}

fn inject_child<P, I>(child: &P, injector: &I, paths: &EnginePaths) -> Result<Width, InjectError>
where
    P: ChildProcess + ?Sized,
    I: Injector<P> + ?Sized,
{
    let (_, headers) = find_image(child).ok_or(InjectError::NoImage)?;
    let width = classify(&headers)?;
    let path = paths.for_width(width).ok_or(InjectError::NoEnginePath(width))?;
    injector.inject(child, width, &path)?;
    Ok(width)
}

/// Inject into a suspended child, then resume it unless `creation_flags`
/// (the caller's original flags) asked for a suspended start. The child is
/// resumed whether or not injection succeeded.
pub fn prepare_child<P, I>(child: &P, injector: &I, paths: &EnginePaths, creation_flags: u32) -> Result<Width, InjectError>
where
    P: ChildProcess + ?Sized,
    I: Injector<P> + ?Sized,
{
    let result = inject_child(child, injector, paths);
    if creation_flags & CREATE_SUSPENDED == 0 {
        child.resume();
    }
    result
}

#[cfg(windows)]
pub use self::windows_impl::{create_process_a_hook, create_process_w_hook, Win32Child};

#[cfg(windows)]
mod windows_impl {
    use std::ffi::c_void;
    use std::mem::size_of;

    use tracing::{debug, info, warn};
    use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE, TRUE};
    use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
    use windows::Win32::System::Memory::{VirtualQueryEx, MEMORY_BASIC_INFORMATION};
    use windows::Win32::System::Threading::{ResumeThread, PROCESS_INFORMATION};

    use super::{prepare_child, suspended_flags, ChildProcess, MemoryRegion};
    use crate::hook::HookId;
    use crate::propagate::inject::RemoteThreadInjector;
    use crate::propagate::{narrow_arg, wide_arg, InjectError};
    use crate::runtime::{self, Engine};

    type CreateProcessAFn = unsafe extern "system" fn(
        *const u8,
        *mut u8,
        *const c_void,
        *const c_void,
        BOOL,
        u32,
        *const c_void,
        *const u8,
        *const c_void,
        *mut PROCESS_INFORMATION,
    ) -> BOOL;

    type CreateProcessWFn = unsafe extern "system" fn(
        *const u16,
        *mut u16,
        *const c_void,
        *const c_void,
        BOOL,
        u32,
        *const c_void,
        *const u16,
        *const c_void,
        *mut PROCESS_INFORMATION,
    ) -> BOOL;

    /// A child created by one of the `CreateProcess` replacements.
    pub struct Win32Child {
        info: PROCESS_INFORMATION,
    }

    impl Win32Child {
        pub fn new(info: PROCESS_INFORMATION) -> Self {
            Self { info }
        }

        pub fn process(&self) -> HANDLE {
            self.info.hProcess
        }
    }

    impl ChildProcess for Win32Child {
        fn query_region(&self, address: usize) -> Option<MemoryRegion> {
            let mut mbi = MEMORY_BASIC_INFORMATION::default();
            let len = unsafe {
                VirtualQueryEx(
                    self.info.hProcess,
                    Some(address as *const c_void),
                    &mut mbi,
                    size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if len == 0 {
                return None;
            }
            Some(MemoryRegion {
                base: mbi.BaseAddress as usize,
                allocation_base: mbi.AllocationBase as usize,
                size: mbi.RegionSize,
            })
        }

        fn read_memory(&self, address: usize, buf: &mut [u8]) -> usize {
            let mut read = 0usize;
            let ok = unsafe {
                ReadProcessMemory(
                    self.info.hProcess,
                    address as *const c_void,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    Some(&mut read),
                )
            };
            if ok.is_ok() {
                read
            } else {
                0
            }
        }

        fn resume(&self) {
            unsafe {
                ResumeThread(self.info.hThread);
            }
        }
    }

    fn after_create(engine: &Engine, info: PROCESS_INFORMATION, flags: u32) {
        let child = Win32Child::new(info);
        match prepare_child(&child, &RemoteThreadInjector, &engine.paths, flags) {
            Ok(width) => info!(pid = info.dwProcessId, "Injected {} engine", width),
            Err(e @ InjectError::NotConsole(_)) => debug!(pid = info.dwProcessId, "{}", e),
            Err(e) => warn!(pid = info.dwProcessId, "Child runs without interception: {}", e),
        }
    }

    /// Give the child's handles to the caller, or close them when the caller
    /// passed nowhere to receive them.
    pub(super) unsafe fn hand_over(info: PROCESS_INFORMATION, out: *mut PROCESS_INFORMATION) {
        if out.is_null() {
            let _ = CloseHandle(info.hThread);
            let _ = CloseHandle(info.hProcess);
        } else {
            *out = info;
        }
    }

    fn propagating() -> Option<&'static Engine> {
        runtime::engine().filter(|e| e.config.propagate.children)
    }

    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "system" fn create_process_a_hook(
        application: *const u8,
        command_line: *mut u8,
        process_attributes: *const c_void,
        thread_attributes: *const c_void,
        inherit_handles: BOOL,
        flags: u32,
        environment: *const c_void,
        directory: *const u8,
        startup: *const c_void,
        process_info: *mut PROCESS_INFORMATION,
    ) -> BOOL {
        let Some(create) = runtime::original::<CreateProcessAFn>(HookId::CreateProcessA) else {
            return BOOL(0);
        };
        let Some(engine) = propagating() else {
            return create(
                application, command_line, process_attributes, thread_attributes, inherit_handles,
                flags, environment, directory, startup, process_info,
            );
        };

        let mut info = PROCESS_INFORMATION::default();
        let created = create(
            application, command_line, process_attributes, thread_attributes, inherit_handles,
            suspended_flags(flags), environment, directory, startup, &mut info,
        );
        if !created.as_bool() {
            return created;
        }
        debug!("CreateProcessA: \"{}\", \"{}\"", narrow_arg(application), narrow_arg(command_line));
        after_create(engine, info, flags);
        hand_over(info, process_info);
        TRUE
    }

    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "system" fn create_process_w_hook(
        application: *const u16,
        command_line: *mut u16,
        process_attributes: *const c_void,
        thread_attributes: *const c_void,
        inherit_handles: BOOL,
        flags: u32,
        environment: *const c_void,
        directory: *const u16,
        startup: *const c_void,
        process_info: *mut PROCESS_INFORMATION,
    ) -> BOOL {
        let Some(create) = runtime::original::<CreateProcessWFn>(HookId::CreateProcessW) else {
            return BOOL(0);
        };
        let Some(engine) = propagating() else {
            return create(
                application, command_line, process_attributes, thread_attributes, inherit_handles,
                flags, environment, directory, startup, process_info,
            );
        };

        let mut info = PROCESS_INFORMATION::default();
        let created = create(
            application, command_line, process_attributes, thread_attributes, inherit_handles,
            suspended_flags(flags), environment, directory, startup, &mut info,
        );
        if !created.as_bool() {
            return created;
        }
        debug!("CreateProcessW: \"{}\", \"{}\"", wide_arg(application), wide_arg(command_line));
        after_create(engine, info, flags);
        hand_over(info, process_info);
        TRUE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::pe::{MACHINE_AMD64, MACHINE_I386, OPTIONAL_MAGIC_32, OPTIONAL_MAGIC_64};
    use crate::hook::testing::ImageBuilder;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    /// Address space of regions; `memory` maps allocation bases to contents.
    /// A query inside a gap answers with the next region.
    #[derive(Default)]
    struct FakeChild {
        regions: Vec<MemoryRegion>,
        memory: HashMap<usize, Vec<u8>>,
        resumed: Cell<u32>,
    }

    impl FakeChild {
        fn with_image(image: Vec<u8>) -> Self {
            let mut child = FakeChild::default();
            child.regions.push(MemoryRegion { base: 0, allocation_base: 0, size: 0x1_0000 });
            child.regions.push(MemoryRegion { base: 0x1_0000, allocation_base: 0x1_0000, size: 0x3000 });
            child.memory.insert(0x1_0000, vec![0xCC; 0x3000]);
            child.regions.push(MemoryRegion { base: 0x40_0000, allocation_base: 0x40_0000, size: 0x1000 });
            child.regions.push(MemoryRegion { base: 0x40_1000, allocation_base: 0x40_0000, size: 0x5000 });
            child.memory.insert(0x40_0000, image);
            child
        }
    }

    impl ChildProcess for FakeChild {
        fn query_region(&self, address: usize) -> Option<MemoryRegion> {
            self.regions
                .iter()
                .find(|r| r.base + r.size > address)
                .copied()
        }

        fn read_memory(&self, address: usize, buf: &mut [u8]) -> usize {
            match self.memory.get(&address) {
                Some(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    n
                }
                None => 0,
            }
        }

        fn resume(&self) {
            self.resumed.set(self.resumed.get() + 1);
        }
    }

    #[derive(Default)]
    struct RecordingInjector {
        calls: RefCell<Vec<(Width, PathBuf)>>,
        resumed_at_inject: Cell<Option<u32>>,
        fail: bool,
    }

    impl Injector<FakeChild> for RecordingInjector {
        fn inject(&self, child: &FakeChild, width: Width, module: &Path) -> Result<(), InjectError> {
            self.resumed_at_inject.set(Some(child.resumed.get()));
            self.calls.borrow_mut().push((width, module.to_path_buf()));
            if self.fail {
                Err(InjectError::Remote("denied".into()))
            } else {
                Ok(())
            }
        }
    }

    fn paths() -> EnginePaths {
        EnginePaths::new(None).with_overrides(Some(PathBuf::from("/e/vtshim32.dll")), Some(PathBuf::from("/e/vtshim64.dll")))
    }

    #[test]
    fn test_flags_always_suspended() {
        assert_eq!(suspended_flags(0), CREATE_SUSPENDED);
        assert_eq!(suspended_flags(0x10 | CREATE_SUSPENDED), 0x10 | CREATE_SUSPENDED);
    }

    #[test]
    fn test_find_image_skips_non_images() {
        let image = ImageBuilder::new(MACHINE_AMD64, OPTIONAL_MAGIC_64).build();
        let child = FakeChild::with_image(image.bytes);
        let (base, headers) = find_image(&child).unwrap();
        assert_eq!(base, 0x40_0000);
        assert_eq!(headers.machine, MACHINE_AMD64);
    }

    #[test]
    fn test_find_image_none() {
        let child = FakeChild::with_image(vec![0; 64]);
        assert_eq!(find_image(&child), None);
    }

    #[test]
    fn test_console_child_injected_before_resume() {
        let image = ImageBuilder::new(MACHINE_I386, OPTIONAL_MAGIC_32).build();
        let child = FakeChild::with_image(image.bytes);
        let injector = RecordingInjector::default();

        let width = prepare_child(&child, &injector, &paths(), 0).unwrap();
        assert_eq!(width, Width::Bits32);
        assert_eq!(*injector.calls.borrow(), vec![(Width::Bits32, PathBuf::from("/e/vtshim32.dll"))]);
        assert_eq!(injector.resumed_at_inject.get(), Some(0));
        assert_eq!(child.resumed.get(), 1);
    }

    #[test]
    fn test_caller_requested_suspend_is_kept() {
        let image = ImageBuilder::new(MACHINE_AMD64, OPTIONAL_MAGIC_64).build();
        let child = FakeChild::with_image(image.bytes);
        let injector = RecordingInjector::default();

        prepare_child(&child, &injector, &paths(), CREATE_SUSPENDED).unwrap();
        assert_eq!(injector.calls.borrow().len(), 1);
        assert_eq!(child.resumed.get(), 0);
    }

    #[test]
    fn test_gui_child_not_injected() {
        let image = ImageBuilder::new(MACHINE_AMD64, OPTIONAL_MAGIC_64).subsystem(2).build();
        let child = FakeChild::with_image(image.bytes);
        let injector = RecordingInjector::default();

        assert_eq!(prepare_child(&child, &injector, &paths(), 0), Err(InjectError::NotConsole(2)));
        assert!(injector.calls.borrow().is_empty());
        assert_eq!(child.resumed.get(), 1);
    }

    #[test]
    fn test_unsupported_machine() {
        let image = ImageBuilder::new(0xAA64, OPTIONAL_MAGIC_64).build();
        let child = FakeChild::with_image(image.bytes);
        let injector = RecordingInjector::default();

        assert_eq!(
            prepare_child(&child, &injector, &paths(), 0),
            Err(InjectError::UnsupportedMachine(0xAA64))
        );
        assert_eq!(child.resumed.get(), 1);
    }

    #[test]
    fn test_injection_failure_still_resumes() {
        let image = ImageBuilder::new(MACHINE_I386, OPTIONAL_MAGIC_32).build();
        let child = FakeChild::with_image(image.bytes);
        let injector = RecordingInjector { fail: true, ..Default::default() };

        assert!(matches!(prepare_child(&child, &injector, &paths(), 0), Err(InjectError::Remote(_))));
        assert_eq!(child.resumed.get(), 1);
    }

    #[test]
    fn test_missing_engine_path() {
        let image = ImageBuilder::new(MACHINE_I386, OPTIONAL_MAGIC_32).build();
        let child = FakeChild::with_image(image.bytes);
        let injector = RecordingInjector::default();

        assert_eq!(
            prepare_child(&child, &injector, &EnginePaths::new(None), 0),
            Err(InjectError::NoEnginePath(Width::Bits32))
        );
        assert!(injector.calls.borrow().is_empty());
    }

    #[test]
    #[cfg(windows)]
    fn test_unreceived_handles_are_closed() {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::{GetHandleInformation, BOOL};
        use windows::Win32::System::Threading::{CreateEventW, PROCESS_INFORMATION};

        let event = || unsafe { CreateEventW(None, BOOL(1), BOOL(0), PCWSTR::null()) }.unwrap();

        unsafe {
            let info = PROCESS_INFORMATION {
                hProcess: event(),
                hThread: event(),
                ..Default::default()
            };
            let mut received = PROCESS_INFORMATION::default();
            windows_impl::hand_over(info, &mut received);
            assert_eq!(received.hProcess, info.hProcess);
            let mut flags = 0u32;
            assert!(GetHandleInformation(info.hProcess, &mut flags).is_ok());

            windows_impl::hand_over(info, std::ptr::null_mut());
            assert!(GetHandleInformation(info.hProcess, &mut flags).is_err());
            assert!(GetHandleInformation(info.hThread, &mut flags).is_err());
        }
    }

    #[test]
    fn test_no_image_found() {
        let child = FakeChild::default();
        let injector = RecordingInjector::default();
        assert_eq!(prepare_child(&child, &injector, &paths(), 0), Err(InjectError::NoImage));
        assert_eq!(child.resumed.get(), 1);
    }
}
