use anyhow::{anyhow, Result};
use tracing::instrument;
use xcb::{
    x::{self, Atom, GetProperty, InternAtom, QueryTree, Window, ATOM_ANY},
    Connection, Xid, XidNew,
};

use super::{WindowHandle, WindowSystem};

/// Ancestor walks stop here even if the tree reports ever more parents.
const MAX_ANCESTOR_DEPTH: usize = 32;

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_focused_window(conn: &Connection, root: &Window, active_window_atom: Atom) -> Result<Window> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: *root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    let windows = result.value::<Window>();
    if windows.is_empty() || windows[0].resource_id() == 0 {
        return Err(anyhow!("No window currently holds input focus"));
    }
    Ok(windows[0])
}

fn get_pid(conn: &Connection, window: Window, pid_atom: Atom) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: pid_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    let result_slice = result.value::<u32>();
    if result_slice.is_empty() {
        return Ok(None);
    }
    Ok(Some(result_slice[0]))
}

fn get_wm_class(conn: &Connection, window: Window) -> Result<Option<String>> {
    let reply = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: x::ATOM_WM_CLASS,
        r#type: x::ATOM_STRING,
        long_offset: 0,
        long_length: 1024,
    }))?;
    Ok(parse_wm_class(reply.value::<u8>()))
}

/// WM_CLASS carries two NUL-terminated strings, instance then class. The
/// class part names the application.
fn parse_wm_class(value: &[u8]) -> Option<String> {
    let mut parts = value
        .split(|byte| *byte == 0)
        .filter(|part| !part.is_empty());
    let instance = parts.next()?;
    let class = parts.next().unwrap_or(instance);
    Some(String::from_utf8_lossy(class).into_owned())
}

pub struct X11WindowSystem {
    connection: Connection,
    preferred_screen: i32,
    active_window_atom: Atom,
    pid_atom: Atom,
}

impl X11WindowSystem {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            preferred_screen,
            active_window_atom,
            pid_atom,
        })
    }

    fn root_window(&self) -> Window {
        let setup = self.connection.get_setup();

        // Currently the application only supports 1 x11 screen.
        setup
            .roots()
            .nth(self.preferred_screen.max(0) as usize)
            .unwrap()
            .root()
    }

    fn window_from_handle(handle: WindowHandle) -> Window {
        unsafe { Window::new(handle.0 as u32) }
    }

    /// Resolves a window's class, walking up the ancestor chain when a window
    /// delegates class metadata to a parent. The walk terminates at the root
    /// window, at a null parent, or at [MAX_ANCESTOR_DEPTH].
    fn resolve_class(&self, mut window: Window) -> Result<Option<String>> {
        for _ in 0..MAX_ANCESTOR_DEPTH {
            if let Some(class) = get_wm_class(&self.connection, window)? {
                return Ok(Some(class));
            }

            let tree = self
                .connection
                .wait_for_reply(self.connection.send_request(&QueryTree { window }))?;
            let parent = tree.parent();
            if parent.resource_id() == 0
                || parent.resource_id() == window.resource_id()
                || window.resource_id() == tree.root().resource_id()
            {
                return Ok(None);
            }
            window = parent;
        }
        Ok(None)
    }
}

impl WindowSystem for X11WindowSystem {
    #[instrument(skip(self))]
    fn focused_window(&mut self) -> Result<WindowHandle> {
        assert!(self.preferred_screen >= 0);

        let root = self.root_window();
        let focused = get_focused_window(&self.connection, &root, self.active_window_atom)?;
        Ok(WindowHandle(focused.resource_id() as u64))
    }

    #[instrument(skip(self))]
    fn window_class(&mut self, window: WindowHandle) -> Result<String> {
        let resolved = self.resolve_class(Self::window_from_handle(window))?;
        resolved.ok_or_else(|| anyhow!("Window {window:?} has no class in its ancestor chain"))
    }

    #[instrument(skip(self))]
    fn window_pid(&mut self, window: WindowHandle) -> Result<Option<u32>> {
        get_pid(
            &self.connection,
            Self::window_from_handle(window),
            self.pid_atom,
        )
    }
}
