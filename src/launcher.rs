//! The launcher side of the protocol: announcing and tracking a launch
use crate::{
    display::Display,
    launchee::{ENV_LAUNCH_ID, ENV_LAUNCH_WINDOW},
    x::{broadcast_to_roots, prop, Atom, ClientMessage, ClientMessageData, XConn, XEvent},
    LaunchType, Rect, Time, Xid, CURRENT_TIME,
};
use std::{
    cell::RefCell,
    env,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU32, Ordering},
    sync::OnceLock,
};
use tracing::{error, warn};

/// The events a launcher receives about one of its own launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LauncherEventKind {
    /// The launch was canceled, by the launchee or another party
    Canceled,
    /// The launch finished: the launchee marked itself complete or the
    /// launch window was destroyed
    Completed,
    /// The launchee signalled that it is still making progress
    Pulse,
}

/// An event delivered to a [LauncherContext] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LauncherEvent {
    /// What happened
    pub kind: LauncherEventKind,
    /// The server timestamp of the change, or [CURRENT_TIME] if none is known
    pub time: Time,
}

/// The callback invoked with events for a launcher context.
pub type LauncherCallback<X> = Box<dyn FnMut(&LauncherContext<X>, &LauncherEvent)>;

/// The launcher side of a launch sequence.
///
/// Created by the program starting an application (a file manager reacting
/// to a double click, say). All metadata should be set before calling
/// [initiate][LauncherContext::initiate]; after initiation the setters warn
/// and do nothing. Dropping the last handle to a context destroys its launch
/// window, which monitors treat as completion.
pub struct LauncherContext<X: XConn> {
    inner: Rc<LauncherState<X>>,
}

impl<X: XConn> Clone for LauncherContext<X> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

pub(crate) struct LauncherState<X: XConn> {
    display: Display<X>,
    callback: RefCell<Option<LauncherCallback<X>>>,
    data: RefCell<LauncherData>,
}

#[derive(Default)]
struct LauncherData {
    launch_id: Option<String>,
    launch_window: Option<Xid>,
    ty: LaunchType,
    name: Option<String>,
    description: Option<String>,
    workspace: Option<u32>,
    resource_class: Option<String>,
    resource_name: Option<String>,
    window_title: Option<String>,
    binary_name: Option<String>,
    icon_name: Option<String>,
    pid: Option<u32>,
    supports_cancel: bool,
    geometry: Option<Rect>,
    geometry_window: Option<Xid>,
    canceled: bool,
    completed: bool,
}

impl<X: XConn> Drop for LauncherState<X> {
    fn drop(&mut self) {
        if let Some(window) = self.data.borrow().launch_window {
            let conn = self.display.conn();
            conn.push_error_trap();
            if let Err(e) = conn.destroy_window(window) {
                warn!(%e, %window, "unable to destroy launch window");
            }
            conn.pop_error_trap();
        }
    }
}

impl<X: XConn> LauncherContext<X> {
    /// Create a new launcher context on the given display.
    ///
    /// `callback` is invoked with every event concerning this launch from
    /// inside [Display::process_event].
    pub fn new<F>(display: &Display<X>, callback: F) -> Self
    where
        F: FnMut(&LauncherContext<X>, &LauncherEvent) + 'static,
    {
        let inner = Rc::new(LauncherState {
            display: display.clone(),
            callback: RefCell::new(Some(Box::new(callback))),
            data: RefCell::new(LauncherData::default()),
        });

        // newest contexts are offered events first
        display
            .state()
            .launchers
            .borrow_mut()
            .insert(0, Rc::downgrade(&inner));

        Self { inner }
    }

    fn settable(&self, op: &str) -> bool {
        if self.inner.data.borrow().launch_id.is_some() {
            warn!(op, "attribute set on an already initiated launcher context");
            false
        } else {
            true
        }
    }

    /// Set the kind of user action that triggered this launch.
    pub fn set_launch_type(&self, ty: LaunchType) {
        if self.settable("set_launch_type") {
            self.inner.data.borrow_mut().ty = ty;
        }
    }

    /// Set the window whose geometry is the hint for where the launch came from.
    pub fn set_geometry_window(&self, window: Xid) {
        if self.settable("set_geometry_window") {
            self.inner.data.borrow_mut().geometry_window = Some(window);
        }
    }

    /// Set the on screen geometry hint for this launch.
    pub fn set_geometry(&self, r: Rect) {
        if self.settable("set_geometry") {
            self.inner.data.borrow_mut().geometry = Some(r);
        }
    }

    /// Advertise whether this launcher is able to cancel the launch.
    pub fn set_supports_cancel(&self, supports_cancel: bool) {
        if self.settable("set_supports_cancel") {
            self.inner.data.borrow_mut().supports_cancel = supports_cancel;
        }
    }

    /// Set the user visible name of what is being launched.
    pub fn set_name(&self, name: &str) {
        if self.settable("set_name") {
            self.inner.data.borrow_mut().name = Some(name.to_string());
        }
    }

    /// Set the user visible description of the launch ("Opening document...").
    pub fn set_description(&self, description: &str) {
        if self.settable("set_description") {
            self.inner.data.borrow_mut().description = Some(description.to_string());
        }
    }

    /// Set the workspace the launched application should appear on.
    pub fn set_workspace(&self, workspace: u32) {
        if self.settable("set_workspace") {
            self.inner.data.borrow_mut().workspace = Some(workspace);
        }
    }

    /// Set the ICCCM resource class the launched windows are expected to have.
    pub fn set_legacy_resource_class(&self, class: &str) {
        if self.settable("set_legacy_resource_class") {
            self.inner.data.borrow_mut().resource_class = Some(class.to_string());
        }
    }

    /// Set the ICCCM resource name the launched windows are expected to have.
    pub fn set_legacy_resource_name(&self, name: &str) {
        if self.settable("set_legacy_resource_name") {
            self.inner.data.borrow_mut().resource_name = Some(name.to_string());
        }
    }

    /// Set the window title the launched windows are expected to have.
    pub fn set_legacy_window_title(&self, title: &str) {
        if self.settable("set_legacy_window_title") {
            self.inner.data.borrow_mut().window_title = Some(title.to_string());
        }
    }

    /// Set the name of the binary being launched.
    pub fn set_binary_name(&self, name: &str) {
        if self.settable("set_binary_name") {
            self.inner.data.borrow_mut().binary_name = Some(name.to_string());
        }
    }

    /// Set the name of the icon to display for this launch.
    pub fn set_icon_name(&self, name: &str) {
        if self.settable("set_icon_name") {
            self.inner.data.borrow_mut().icon_name = Some(name.to_string());
        }
    }

    /// Set the process ID of the launched child.
    ///
    /// Unlike the other setters this may be called at any time, since the
    /// pid is usually only known after forking; if the launch has already
    /// been initiated the `_NET_LAUNCH_PID` property is updated as well.
    pub fn set_pid(&self, pid: u32) {
        let window = {
            let mut data = self.inner.data.borrow_mut();
            data.pid = Some(pid);
            data.launch_window
        };

        if let Some(window) = window {
            prop::set_cardinal(self.inner.display.conn(), window, Atom::NetLaunchPid, pid);
        }
    }

    /// Initiate the launch sequence.
    ///
    /// Builds the launch ID, creates the launch window, writes every
    /// configured property to it inside a single error trap and broadcasts
    /// `_NET_LAUNCH_INITIATE` to every screen. All launch metadata must be
    /// set before this call; calling it twice warns and does nothing.
    ///
    /// `launcher_name` and `launchee_name` become part of the launch ID and
    /// are only intended for debug output; `timestamp` should be the X
    /// timestamp of the user event that triggered the launch.
    pub fn initiate(&self, launcher_name: &str, launchee_name: &str, timestamp: Time) {
        let mut data = self.inner.data.borrow_mut();
        if data.launch_id.is_some() {
            warn!("initiate called twice for the same launcher context");
            return;
        }

        let conn = self.inner.display.conn();
        let window = match conn.create_carrier_window() {
            Ok(window) => window,
            Err(e) => {
                error!(%e, "unable to create launch window");
                return;
            }
        };

        let id = build_launch_id(launcher_name, launchee_name, timestamp);
        data.launch_id = Some(id.clone());
        data.launch_window = Some(window);

        // one outer trap around the whole batch; the outermost pop
        // synchronizes with the server once instead of after every write
        conn.push_error_trap();

        prop::set_string(conn, window, Atom::NetLaunchId, &id);
        prop::set_string(conn, window, Atom::NetLaunchHostname, hostname());
        prop::set_atom_list(conn, window, Atom::NetLaunchType, &[data.ty.atom()]);

        if let Some(r) = data.geometry {
            prop::set_cardinal_list(conn, window, Atom::NetLaunchGeometry, &[r.x, r.y, r.w, r.h]);
        }
        if let Some(w) = data.geometry_window {
            prop::set_window(conn, window, Atom::NetLaunchGeometryWindow, w);
        }
        if data.supports_cancel {
            prop::set_cardinal(conn, window, Atom::NetLaunchSupportsCancel, 1);
        }
        if let Some(name) = &data.name {
            prop::set_utf8_string(conn, window, Atom::NetLaunchName, name);
        }
        if let Some(description) = &data.description {
            prop::set_utf8_string(conn, window, Atom::NetLaunchDescription, description);
        }
        if let Some(workspace) = data.workspace {
            prop::set_cardinal(conn, window, Atom::NetLaunchDesktop, workspace);
        }
        if let Some(pid) = data.pid {
            prop::set_cardinal(conn, window, Atom::NetLaunchPid, pid);
        }
        if let Some(binary_name) = &data.binary_name {
            prop::set_string(conn, window, Atom::NetLaunchBinaryName, binary_name);
        }
        if let Some(icon_name) = &data.icon_name {
            prop::set_string(conn, window, Atom::NetLaunchIconName, icon_name);
        }
        if let Some(class) = &data.resource_class {
            prop::set_string(conn, window, Atom::NetLaunchLegacyResourceClass, class);
        }
        if let Some(name) = &data.resource_name {
            prop::set_string(conn, window, Atom::NetLaunchLegacyResourceName, name);
        }
        if let Some(title) = &data.window_title {
            prop::set_string(conn, window, Atom::NetLaunchLegacyName, title);
        }

        conn.pop_error_trap();

        // make sure the launch window exists before anyone hears about it
        conn.flush();

        let msg = ClientMessage::new(
            window,
            Atom::NetLaunchInitiate.as_ref(),
            ClientMessageData::U32([timestamp, 0, 0, 0, 0]),
        );
        if let Err(e) = broadcast_to_roots(conn, &msg) {
            warn!(%e, "unable to broadcast launch initiation");
        }
    }

    /// Mark the launch canceled by writing `_NET_LAUNCH_CANCELED` to the
    /// launch window.
    ///
    /// A Canceled event should be received in response under normal
    /// circumstances. Warns and does nothing if the launch has not been
    /// initiated.
    pub fn cancel(&self) {
        match self.inner.data.borrow().launch_window {
            Some(window) => {
                prop::set_cardinal(self.inner.display.conn(), window, Atom::NetLaunchCanceled, 0)
            }
            None => warn!("cancel called for a launcher context that has not been initiated"),
        }
    }

    /// Mark the launch completed by writing `_NET_LAUNCH_COMPLETE` to the
    /// launch window.
    ///
    /// Normally the launchee marks the launch complete; the launcher has to
    /// do it when a launch is canceled. Warns and does nothing if the launch
    /// has not been initiated.
    pub fn complete(&self) {
        match self.inner.data.borrow().launch_window {
            Some(window) => {
                prop::set_cardinal(self.inner.display.conn(), window, Atom::NetLaunchComplete, 0)
            }
            None => warn!("complete called for a launcher context that has not been initiated"),
        }
    }

    /// Export the launch ID and launch window into the process environment.
    ///
    /// Call after forking but before exec in the child being launched, so
    /// that the launchee can pick the sequence up with
    /// [LauncheeContext::from_environment][crate::LauncheeContext::from_environment].
    pub fn setup_child_process(&self) {
        let data = self.inner.data.borrow();
        let (id, window) = match (&data.launch_id, data.launch_window) {
            (Some(id), Some(window)) => (id.clone(), window),
            _ => {
                warn!("setup_child_process called for a launcher context that has not been initiated");
                return;
            }
        };

        env::set_var(ENV_LAUNCH_ID, id);
        env::set_var(ENV_LAUNCH_WINDOW, format!("{:#x}", *window));
    }

    /// Whether [initiate][LauncherContext::initiate] has been called.
    pub fn initiated(&self) -> bool {
        self.inner.data.borrow().launch_id.is_some()
    }

    /// Whether a Canceled event has been delivered for this context.
    pub fn canceled(&self) -> bool {
        self.inner.data.borrow().canceled
    }

    /// Whether a Completed event has been delivered for this context.
    pub fn completed(&self) -> bool {
        self.inner.data.borrow().completed
    }

    /// The launch ID built at initiation, if initiated.
    pub fn launch_id(&self) -> Option<String> {
        self.inner.data.borrow().launch_id.clone()
    }

    /// The launch window created at initiation, if initiated.
    pub fn launch_window(&self) -> Option<Xid> {
        self.inner.data.borrow().launch_window
    }

    /// The display this context was created on.
    pub fn display(&self) -> &Display<X> {
        &self.inner.display
    }
}

// Launch IDs must be unique per process even when two launches share a
// timestamp, so the discriminating counter is process wide.
static NEXT_LAUNCH_SEQUENCE: AtomicU32 = AtomicU32::new(0);

fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();

    HOSTNAME.get_or_init(|| {
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default()
    })
}

fn build_launch_id(launcher_name: &str, launchee_name: &str, timestamp: Time) -> String {
    let seq = NEXT_LAUNCH_SEQUENCE.fetch_add(1, Ordering::Relaxed);

    format!(
        "{}/{}/{}/{}-{}-{}",
        launcher_name.replace('/', "|"),
        launchee_name.replace('/', "|"),
        timestamp,
        std::process::id(),
        seq,
        hostname()
    )
}

pub(crate) fn process_event<X: XConn>(display: &Display<X>, event: &XEvent) -> bool {
    {
        let mut launchers = display.state().launchers.borrow_mut();
        launchers.retain(|w| w.strong_count() > 0);
        if launchers.is_empty() {
            return false; // no one cares
        }
    }

    let conn = display.conn();
    let (consumed, window, launcher_event) = match event {
        XEvent::PropertyNotify(p) if p.atom == Atom::NetLaunchCanceled.as_ref() => {
            let ev = prop::get_cardinal(conn, p.window, Atom::NetLaunchCanceled).map(|_| {
                LauncherEvent {
                    kind: LauncherEventKind::Canceled,
                    time: p.time,
                }
            });
            (true, p.window, ev)
        }

        XEvent::PropertyNotify(p) if p.atom == Atom::NetLaunchComplete.as_ref() => {
            let ev = prop::get_cardinal(conn, p.window, Atom::NetLaunchComplete).map(|_| {
                LauncherEvent {
                    kind: LauncherEventKind::Completed,
                    time: p.time,
                }
            });
            (true, p.window, ev)
        }

        XEvent::ClientMessage(m) if m.dtype == Atom::NetLaunchPulse.as_ref() => (
            true,
            m.window,
            Some(LauncherEvent {
                kind: LauncherEventKind::Pulse,
                time: CURRENT_TIME,
            }),
        ),

        // window destruction completes the launch but is not consumed: the
        // destroyed window may be of interest to other parts of the caller
        XEvent::Destroy(window) => {
            let have_live_context = display
                .state()
                .launchers
                .borrow()
                .iter()
                .filter_map(Weak::upgrade)
                .any(|s| {
                    let d = s.data.borrow();
                    !d.completed && d.launch_window == Some(*window)
                });

            let ev = have_live_context.then_some(LauncherEvent {
                kind: LauncherEventKind::Completed,
                time: CURRENT_TIME,
            });
            (false, *window, ev)
        }

        _ => return false,
    };

    if let Some(launcher_event) = launcher_event {
        dispatch(display, window, launcher_event);
    }

    consumed
}

// Find every live, not yet completed context for the launch window, then
// deliver to each with at-most-once filtering of terminal events. The
// snapshot insulates the iteration from callbacks creating or dropping
// contexts while we dispatch.
fn dispatch<X: XConn>(display: &Display<X>, window: Xid, event: LauncherEvent) {
    let targets: Vec<Rc<LauncherState<X>>> = display
        .state()
        .launchers
        .borrow()
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|s| {
            let d = s.data.borrow();
            !d.completed && d.launch_window == Some(window)
        })
        .collect();

    for state in targets {
        {
            let mut data = state.data.borrow_mut();
            match event.kind {
                LauncherEventKind::Canceled => {
                    if data.canceled {
                        continue;
                    }
                    data.canceled = true;
                }
                LauncherEventKind::Completed => {
                    if data.completed {
                        continue;
                    }
                    data.completed = true;
                }
                LauncherEventKind::Pulse => (),
            }
        }

        let ctx = LauncherContext {
            inner: Rc::clone(&state),
        };
        let cb = state.callback.borrow_mut().take();
        if let Some(mut cb) = cb {
            cb(&ctx, &event);
            let mut slot = state.callback.borrow_mut();
            if slot.is_none() {
                *slot = Some(cb);
            }
        }
    }
}
