//! Window-system and process introspection primitives.
//! [GenericWindowSystem] is the main artifact of this module, abstracting over
//! the platform backends.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use anyhow::Result;
use thiserror::Error;

/// Stable identity of a window, valid for comparison across polls. Titles are
/// not part of the identity since they can change without a focus change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Contract desktop backends must implement.
#[cfg_attr(test, mockall::automock)]
pub trait WindowSystem: Send {
    /// Handle of the window currently holding input focus.
    fn focused_window(&mut self) -> Result<WindowHandle>;

    /// Class of the given window. Backends walk up the ancestor chain when a
    /// window delegates class metadata to a parent.
    fn window_class(&mut self, window: WindowHandle) -> Result<String>;

    /// PID of the process owning the window, when the backend exposes one.
    fn window_pid(&mut self, window: WindowHandle) -> Result<Option<u32>>;
}

#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("process {pid} no longer exists")]
    ProcessGone { pid: u32 },
}

/// PID to command-line resolution, separate from the window system because a
/// process can exit independently of its window.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessLookup: Send {
    fn command_line(&mut self, pid: u32) -> Result<Vec<String>, AttributionError>;
}

/// [ProcessLookup] backed by the system process table.
pub struct SysinfoProcessLookup;

impl ProcessLookup for SysinfoProcessLookup {
    fn command_line(&mut self, pid: u32) -> Result<Vec<String>, AttributionError> {
        let system = sysinfo::System::new_all();
        let Some(process) = system.process(sysinfo::Pid::from_u32(pid)) else {
            return Err(AttributionError::ProcessGone { pid });
        };

        Ok(process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect())
    }
}

/// Serves as a cross-compatible [WindowSystem] implementation.
pub struct GenericWindowSystem {
    inner: Box<dyn WindowSystem>,
}

impl GenericWindowSystem {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsWindowSystem;
                Ok(Self {
                    inner: Box::new(WindowsWindowSystem::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::X11WindowSystem;
                Ok(Self {
                    inner: Box::new(X11WindowSystem::new()?),
                })
            }
            else {
                // This runtime error is needed to allow the project to be compiled for during testing.
                unimplemented!("No window system backend was specified")
            }
        }
    }
}

impl WindowSystem for GenericWindowSystem {
    fn focused_window(&mut self) -> Result<WindowHandle> {
        self.inner.focused_window()
    }

    fn window_class(&mut self, window: WindowHandle) -> Result<String> {
        self.inner.window_class(window)
    }

    fn window_pid(&mut self, window: WindowHandle) -> Result<Option<u32>> {
        self.inner.window_pid(window)
    }
}
