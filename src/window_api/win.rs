use anyhow::{anyhow, Result};
use tracing::error;
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{GetLastError, HWND},
        System::{
            Diagnostics::Debug::{
                FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
            },
            SystemServices::{LANG_ENGLISH, SUBLANG_ENGLISH_US},
        },
        UI::WindowsAndMessaging::{GetClassNameW, GetForegroundWindow, GetWindowThreadProcessId},
    },
};

use super::{WindowHandle, WindowSystem};

fn last_error_message(context: &str) -> anyhow::Error {
    let err = unsafe { GetLastError() };
    let mut message_buffer = [0u16; 2048];
    let size = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            err.0,
            LANG_ENGLISH | (SUBLANG_ENGLISH_US << 10),
            PWSTR::from_raw(message_buffer.as_mut_ptr()),
            2048,
            None,
        )
    };
    if size == 0 {
        anyhow!("{context}")
    } else {
        let data =
            String::from_utf16(&message_buffer[0..size as usize]).expect("Failed to unwrap");
        anyhow!("{context}: {data}")
    }
}

fn hwnd_from_handle(handle: WindowHandle) -> HWND {
    HWND(handle.0 as usize as *mut core::ffi::c_void)
}

pub struct WindowsWindowSystem {}

impl WindowsWindowSystem {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsWindowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSystem for WindowsWindowSystem {
    fn focused_window(&mut self) -> Result<WindowHandle> {
        let window = unsafe { GetForegroundWindow() };
        if window.is_invalid() {
            return Err(last_error_message("Failed to get foreground window"))
                .inspect_err(|e| error!("{e:?}"));
        }
        Ok(WindowHandle(window.0 as usize as u64))
    }

    fn window_class(&mut self, window: WindowHandle) -> Result<String> {
        let mut text: [u16; 256] = [0; 256];
        let len = unsafe { GetClassNameW(hwnd_from_handle(window), &mut text) };
        if len == 0 {
            return Err(last_error_message("Failed to get window class"))
                .inspect_err(|e| error!("{e:?}"));
        }
        Ok(String::from_utf16_lossy(&text[..len as usize]))
    }

    fn window_pid(&mut self, window: WindowHandle) -> Result<Option<u32>> {
        let mut id = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd_from_handle(window), Some(&mut id)) };
        if id == 0 {
            return Err(last_error_message("Failed to get window owner process"))
                .inspect_err(|e| error!("{e:?}"));
        }
        Ok(Some(id))
    }
}
