//! The monitor side of the protocol: observing every launch on a display
//!
//! Monitors are the programs that actually show launch feedback: window
//! managers, task bars, busy cursor daemons. A [MonitorContext] subscribes
//! to events about every launch sequence in flight on a display, whether it
//! was announced through the property protocol or through the
//! `_KDE_STARTUP_INFO` xmessage sidechannel.
use crate::{
    display::Display,
    wire,
    x::{prop, Atom, XConn, XEvent},
    xmessage, LaunchType, Rect, Time, Xid, CURRENT_TIME,
};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};
use tracing::warn;

/// The events a monitor receives about a launch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorEventKind {
    /// A new launch sequence has been observed
    Initiated,
    /// The launchee signalled that it is still making progress
    Pulse,
    /// The geometry hint of the sequence changed
    GeometryChanged,
    /// The pid of the launched process changed
    PidChanged,
    /// The target workspace of the sequence changed
    WorkspaceChanged,
    /// The sequence was canceled
    Canceled,
    /// The sequence finished and is no longer tracked
    Completed,
}

/// An event delivered to a [MonitorContext] callback.
pub struct MonitorEvent<X: XConn> {
    kind: MonitorEventKind,
    time: Time,
    sequence: LaunchSequence<X>,
}

impl<X: XConn> MonitorEvent<X> {
    /// What happened
    pub fn kind(&self) -> MonitorEventKind {
        self.kind
    }

    /// The server timestamp of the change, or [CURRENT_TIME] if none is known
    pub fn time(&self) -> Time {
        self.time
    }

    /// The launch sequence the event concerns
    pub fn sequence(&self) -> &LaunchSequence<X> {
        &self.sequence
    }
}

/// The callback invoked with events for a monitor context.
pub type MonitorCallback<X> = Box<dyn FnMut(&MonitorContext<X>, &MonitorEvent<X>)>;

/// A subscription to launch sequence events on a display.
///
/// A context only receives events for sequences first observed at or after
/// its own creation: feedback for launches that were already in flight when
/// the monitor started is someone else's responsibility.
pub struct MonitorContext<X: XConn> {
    inner: Rc<MonitorState<X>>,
}

impl<X: XConn> Clone for MonitorContext<X> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

pub(crate) struct MonitorState<X: XConn> {
    display: Display<X>,
    callback: RefCell<Option<MonitorCallback<X>>>,
    creation_serial: u32,
}

impl<X: XConn> Drop for MonitorState<X> {
    fn drop(&mut self) {
        let st = self.display.state();
        let any_left = {
            let mut monitors = st.monitors.borrow_mut();
            monitors.retain(|w| w.strong_count() > 0);
            !monitors.is_empty()
        };

        if !any_left {
            if let Some(token) = st.monitor_route.take() {
                xmessage::remove_handler(&self.display, token);
            }
        }
    }
}

impl<X: XConn> MonitorContext<X> {
    /// Create a new monitor context on the given display.
    ///
    /// `callback` is invoked with every event for eligible sequences from
    /// inside [Display::process_event]. To observe initiations the caller
    /// must have `PropertyChangeMask` selected on every root window of the
    /// display; that is deliberately not done here since it is likely to
    /// interfere with the caller's own event selection.
    pub fn new<F>(display: &Display<X>, callback: F) -> Self
    where
        F: FnMut(&MonitorContext<X>, &MonitorEvent<X>) + 'static,
    {
        let first_context = {
            let mut monitors = display.state().monitors.borrow_mut();
            monitors.retain(|w| w.strong_count() > 0);
            monitors.is_empty()
        };

        // the xmessage sidechannel is only routed while monitors exist
        if first_context && display.state().monitor_route.get().is_none() {
            let token = xmessage::add_handler(
                display,
                Atom::KdeStartupInfo.as_ref(),
                |d, _, payload| handle_xmessage(d, payload),
            );
            display.state().monitor_route.set(Some(token));
        }

        let inner = Rc::new(MonitorState {
            display: display.clone(),
            callback: RefCell::new(Some(Box::new(callback))),
            // we get events for sequence serials >= this
            creation_serial: display.state().next_sequence_serial.get(),
        });

        display
            .state()
            .monitors
            .borrow_mut()
            .insert(0, Rc::downgrade(&inner));

        Self { inner }
    }

    /// The display this context was created on.
    pub fn display(&self) -> &Display<X> {
        &self.inner.display
    }
}

/// The monitor's view of one launch sequence.
///
/// Attributes mirror what the launcher advertised. Sequences announced only
/// through the xmessage sidechannel have no launch window.
pub struct LaunchSequence<X: XConn> {
    inner: Rc<SequenceState<X>>,
}

impl<X: XConn> Clone for LaunchSequence<X> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<X: XConn> std::fmt::Debug for LaunchSequence<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchSequence")
            .field("id", &self.inner.id)
            .field("launch_window", &self.inner.launch_window)
            .finish_non_exhaustive()
    }
}

pub(crate) struct SequenceState<X: XConn> {
    display: Display<X>,
    id: String,
    launch_window: Option<Xid>,
    creation_serial: u32,
    data: RefCell<SequenceData>,
}

#[derive(Default)]
struct SequenceData {
    name: Option<String>,
    description: Option<String>,
    resource_class: Option<String>,
    resource_name: Option<String>,
    window_title: Option<String>,
    binary_name: Option<String>,
    hostname: Option<String>,
    icon_name: Option<String>,
    launch_type: LaunchType,
    workspace: Option<u32>,
    pid: Option<u32>,
    geometry: Option<Rect>,
    geometry_window: Option<Xid>,
    supports_cancel: bool,
    canceled: bool,
    completed: bool,
}

impl<X: XConn> LaunchSequence<X> {
    /// The launch ID identifying this sequence across processes.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The launch window, or `None` for xmessage only sequences.
    pub fn launch_window(&self) -> Option<Xid> {
        self.inner.launch_window
    }

    /// The user visible name of what is being launched.
    pub fn name(&self) -> Option<String> {
        self.inner.data.borrow().name.clone()
    }

    /// The user visible description of the launch.
    pub fn description(&self) -> Option<String> {
        self.inner.data.borrow().description.clone()
    }

    /// The ICCCM resource class the launched windows are expected to have.
    pub fn legacy_resource_class(&self) -> Option<String> {
        self.inner.data.borrow().resource_class.clone()
    }

    /// The ICCCM resource name the launched windows are expected to have.
    pub fn legacy_resource_name(&self) -> Option<String> {
        self.inner.data.borrow().resource_name.clone()
    }

    /// The window title the launched windows are expected to have.
    pub fn legacy_window_title(&self) -> Option<String> {
        self.inner.data.borrow().window_title.clone()
    }

    /// The name of the binary being launched.
    pub fn binary_name(&self) -> Option<String> {
        self.inner.data.borrow().binary_name.clone()
    }

    /// The host the launch originated on.
    pub fn hostname(&self) -> Option<String> {
        self.inner.data.borrow().hostname.clone()
    }

    /// The name of the icon to display for this launch.
    pub fn icon_name(&self) -> Option<String> {
        self.inner.data.borrow().icon_name.clone()
    }

    /// The kind of user action that triggered the launch.
    pub fn launch_type(&self) -> LaunchType {
        self.inner.data.borrow().launch_type
    }

    /// The workspace the launched application should appear on.
    pub fn workspace(&self) -> Option<u32> {
        self.inner.data.borrow().workspace
    }

    /// The process ID of the launched process, if known.
    pub fn pid(&self) -> Option<u32> {
        self.inner.data.borrow().pid
    }

    /// The on screen geometry hint for this launch.
    pub fn geometry(&self) -> Option<Rect> {
        self.inner.data.borrow().geometry
    }

    /// The window whose geometry is the hint for where the launch came from.
    pub fn geometry_window(&self) -> Option<Xid> {
        self.inner.data.borrow().geometry_window
    }

    /// Whether the launcher advertised the ability to cancel this launch.
    pub fn supports_cancel(&self) -> bool {
        self.inner.data.borrow().supports_cancel
    }

    /// Whether a Canceled event has been dispatched for this sequence.
    pub fn canceled(&self) -> bool {
        self.inner.data.borrow().canceled
    }

    /// Whether a Completed event has been dispatched for this sequence.
    pub fn completed(&self) -> bool {
        self.inner.data.borrow().completed
    }

    /// Request cancellation of this launch by writing `_NET_LAUNCH_CANCELED`
    /// to its launch window.
    ///
    /// Does nothing unless the launcher advertised `supports_cancel` and the
    /// sequence has a real launch window.
    pub fn cancel(&self) {
        let supports_cancel = self.inner.data.borrow().supports_cancel;
        if let (true, Some(window)) = (supports_cancel, self.inner.launch_window) {
            prop::set_cardinal(
                self.inner.display.conn(),
                window,
                Atom::NetLaunchCanceled,
                0,
            );
        }
    }

    fn update_geometry(&self) {
        let window = match self.inner.launch_window {
            Some(window) => window,
            None => return,
        };

        let conn = self.inner.display.conn();
        self.inner.data.borrow_mut().geometry = read_geometry(conn, window);
    }

    fn update_pid(&self) {
        let window = match self.inner.launch_window {
            Some(window) => window,
            None => return,
        };

        let conn = self.inner.display.conn();
        self.inner.data.borrow_mut().pid = prop::get_cardinal(conn, window, Atom::NetLaunchPid);
    }
}

fn read_geometry<X: XConn>(conn: &X, window: Xid) -> Option<Rect> {
    match prop::get_cardinal_list(conn, window, Atom::NetLaunchGeometry) {
        Some(vals) if vals.len() == 4 => Some(Rect::new(vals[0], vals[1], vals[2], vals[3])),
        _ => None,
    }
}

fn bump_serial<X: XConn>(display: &Display<X>) -> u32 {
    let serial = display.state().next_sequence_serial.get();
    display.state().next_sequence_serial.set(serial + 1);

    serial
}

// Build a sequence by reading the launch window's properties. Input is
// selected before reading _NET_LAUNCH_ID so that a window vanishing in
// between cannot leave us tracking a sequence we will never see events for:
// the ID read fails on a dead window and aborts creation.
fn new_sequence_from_window<X: XConn>(
    display: &Display<X>,
    window: Xid,
) -> Option<LaunchSequence<X>> {
    let conn = display.conn();

    conn.push_error_trap();
    let watched = conn.watch_window(window);
    conn.pop_error_trap();
    if let Err(e) = watched {
        warn!(%e, %window, "unable to select input on launch window");
    }

    let id = prop::get_string(conn, window, Atom::NetLaunchId)?;

    let mut data = SequenceData {
        name: prop::get_utf8_string(conn, window, Atom::NetLaunchName),
        description: prop::get_utf8_string(conn, window, Atom::NetLaunchDescription),
        resource_class: prop::get_string(conn, window, Atom::NetLaunchLegacyResourceClass),
        resource_name: prop::get_string(conn, window, Atom::NetLaunchLegacyResourceName),
        window_title: prop::get_string(conn, window, Atom::NetLaunchLegacyName),
        binary_name: prop::get_string(conn, window, Atom::NetLaunchBinaryName),
        hostname: prop::get_string(conn, window, Atom::NetLaunchHostname),
        icon_name: prop::get_string(conn, window, Atom::NetLaunchIconName),
        workspace: prop::get_cardinal(conn, window, Atom::NetLaunchDesktop),
        geometry_window: prop::get_window(conn, window, Atom::NetLaunchGeometryWindow),
        supports_cancel: prop::get_cardinal(conn, window, Atom::NetLaunchSupportsCancel)
            .map(|v| v != 0)
            .unwrap_or(false),
        launch_type: prop::get_atom_list(conn, window, Atom::NetLaunchType)
            .and_then(|atoms| atoms.first().copied())
            .map(LaunchType::from_atom)
            .unwrap_or_default(),
        ..Default::default()
    };

    // mutable over the sequence lifetime, read through the shared updaters
    data.geometry = read_geometry(conn, window);
    data.pid = prop::get_cardinal(conn, window, Atom::NetLaunchPid);

    Some(LaunchSequence {
        inner: Rc::new(SequenceState {
            display: display.clone(),
            id,
            launch_window: Some(window),
            creation_serial: bump_serial(display),
            data: RefCell::new(data),
        }),
    })
}

// A sequence announced over the xmessage sidechannel: no launch window, all
// metadata arrives in later change records.
fn new_detached_sequence<X: XConn>(display: &Display<X>, id: String) -> LaunchSequence<X> {
    LaunchSequence {
        inner: Rc::new(SequenceState {
            display: display.clone(),
            id,
            launch_window: None,
            creation_serial: bump_serial(display),
            data: RefCell::new(SequenceData::default()),
        }),
    }
}

fn register_sequence<X: XConn>(display: &Display<X>, sequence: &LaunchSequence<X>) {
    display
        .state()
        .sequences
        .borrow_mut()
        .insert(0, sequence.clone());
}

fn remove_sequence<X: XConn>(display: &Display<X>, sequence: &LaunchSequence<X>) {
    display
        .state()
        .sequences
        .borrow_mut()
        .retain(|s| !Rc::ptr_eq(&s.inner, &sequence.inner));
}

fn find_sequence_by_window<X: XConn>(
    display: &Display<X>,
    window: Xid,
) -> Option<LaunchSequence<X>> {
    display
        .state()
        .sequences
        .borrow()
        .iter()
        .find(|s| s.inner.launch_window == Some(window))
        .cloned()
}

fn find_sequence_by_id<X: XConn>(display: &Display<X>, id: &str) -> Option<LaunchSequence<X>> {
    display
        .state()
        .sequences
        .borrow()
        .iter()
        .find(|s| s.inner.id == id)
        .cloned()
}

pub(crate) fn process_event<X: XConn>(display: &Display<X>, event: &XEvent) -> bool {
    {
        let mut monitors = display.state().monitors.borrow_mut();
        monitors.retain(|w| w.strong_count() > 0);
        if monitors.is_empty() {
            return false; // no one cares
        }
    }

    let conn = display.conn();
    match event {
        XEvent::PropertyNotify(p) if p.atom == Atom::NetLaunchCanceled.as_ref() => {
            if prop::get_cardinal(conn, p.window, Atom::NetLaunchCanceled).is_some() {
                dispatch(
                    display,
                    MonitorEventKind::Canceled,
                    p.time,
                    Some(p.window),
                    None,
                );
                true
            } else {
                false
            }
        }

        XEvent::PropertyNotify(p) if p.atom == Atom::NetLaunchComplete.as_ref() => {
            if prop::get_cardinal(conn, p.window, Atom::NetLaunchComplete).is_some() {
                dispatch(
                    display,
                    MonitorEventKind::Completed,
                    p.time,
                    Some(p.window),
                    None,
                );
                true
            } else {
                false
            }
        }

        XEvent::PropertyNotify(p) if p.atom == Atom::NetLaunchGeometry.as_ref() => {
            dispatch(
                display,
                MonitorEventKind::GeometryChanged,
                p.time,
                Some(p.window),
                None,
            );
            true
        }

        XEvent::PropertyNotify(p) if p.atom == Atom::NetLaunchPid.as_ref() => {
            dispatch(
                display,
                MonitorEventKind::PidChanged,
                p.time,
                Some(p.window),
                None,
            );
            true
        }

        XEvent::ClientMessage(m) if m.dtype == Atom::NetLaunchPulse.as_ref() => {
            dispatch(
                display,
                MonitorEventKind::Pulse,
                CURRENT_TIME,
                Some(m.window),
                None,
            );
            true
        }

        XEvent::ClientMessage(m) if m.dtype == Atom::NetLaunchInitiate.as_ref() => {
            // don't be fooled by duplicate initiate messages
            if find_sequence_by_window(display, m.window).is_none() {
                let timestamp = m.data.words().map(|w| w[0]).unwrap_or(CURRENT_TIME);
                dispatch(
                    display,
                    MonitorEventKind::Initiated,
                    timestamp,
                    Some(m.window),
                    None,
                );
            }
            true
        }

        XEvent::Destroy(window) => {
            if let Some(sequence) = find_sequence_by_window(display, *window) {
                dispatch(
                    display,
                    MonitorEventKind::Completed,
                    CURRENT_TIME,
                    None,
                    Some(sequence),
                );
            }
            false
        }

        _ => false,
    }
}

// Resolve the sequence for an event, refresh mutable state, filter duplicate
// terminal events, then deliver to a snapshot of the eligible contexts. The
// snapshot insulates the delivery loop from callbacks creating or dropping
// contexts and sequences while it runs.
fn dispatch<X: XConn>(
    display: &Display<X>,
    kind: MonitorEventKind,
    time: Time,
    window: Option<Xid>,
    preset: Option<LaunchSequence<X>>,
) {
    let sequence = match (preset, kind) {
        (Some(sequence), _) => Some(sequence),
        (None, MonitorEventKind::Initiated) => window.and_then(|w| {
            let sequence = new_sequence_from_window(display, w)?;
            register_sequence(display, &sequence);
            Some(sequence)
        }),
        (None, _) => window.and_then(|w| find_sequence_by_window(display, w)),
    };

    let sequence = match sequence {
        Some(sequence) => sequence,
        None => return,
    };

    match kind {
        MonitorEventKind::GeometryChanged => sequence.update_geometry(),
        MonitorEventKind::PidChanged => sequence.update_pid(),
        _ => (),
    }

    {
        let mut data = sequence.inner.data.borrow_mut();
        match kind {
            MonitorEventKind::Canceled => {
                if data.canceled {
                    return;
                }
                data.canceled = true;
            }
            MonitorEventKind::Completed => {
                if data.completed {
                    return;
                }
                data.completed = true;
            }
            _ => (),
        }
    }

    // contexts never see events for sequences that predate them
    let targets: Vec<Rc<MonitorState<X>>> = display
        .state()
        .monitors
        .borrow()
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|c| sequence.inner.creation_serial >= c.creation_serial)
        .collect();

    let event = MonitorEvent {
        kind,
        time,
        sequence,
    };

    for state in targets {
        let ctx = MonitorContext {
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

    if kind == MonitorEventKind::Completed {
        remove_sequence(display, &event.sequence);
    }
}

// The xmessage arm of the monitor: records look like
//   new: ID=... BIN=... NAME=...
//   change: ID=... PID=...
//   remove: ID=...
// String fields are write-once; only DESKTOP and PID changes raise events.
pub(crate) fn handle_xmessage<X: XConn>(display: &Display<X>, message: &str) {
    let (prefix, pairs) = match wire::unserialize(message) {
        Some(parsed) => parsed,
        None => return,
    };

    let id = match pairs.iter().find(|(k, _)| k == "ID") {
        Some((_, id)) => id.clone(),
        None => return,
    };

    let mut sequence = find_sequence_by_id(display, &id);
    let mut events = Vec::new();

    if prefix == "new" && sequence.is_none() {
        let seq = new_detached_sequence(display, id);
        register_sequence(display, &seq);
        events.push((MonitorEventKind::Initiated, seq.clone()));
        sequence = Some(seq);
    }

    let sequence = match sequence {
        Some(sequence) => sequence,
        None => return,
    };

    if prefix == "new" || prefix == "change" {
        let mut pid_changed = false;
        let mut workspace_changed = false;

        {
            let mut data = sequence.inner.data.borrow_mut();
            for (key, value) in &pairs {
                match key.as_str() {
                    "BIN" => {
                        if data.binary_name.is_none() {
                            data.binary_name = Some(value.clone());
                        }
                    }
                    "NAME" => {
                        if data.name.is_none() {
                            data.name = Some(value.clone());
                        }
                    }
                    "ICON" => {
                        if data.icon_name.is_none() {
                            data.icon_name = Some(value.clone());
                        }
                    }
                    "WMCLASS" => {
                        if data.resource_class.is_none() {
                            data.resource_class = Some(value.clone());
                        }
                    }
                    "HOSTNAME" => {
                        if data.hostname.is_none() {
                            data.hostname = Some(value.clone());
                        }
                    }
                    "DESKTOP" => match value.parse() {
                        Ok(workspace) => {
                            data.workspace = Some(workspace);
                            workspace_changed = true;
                        }
                        Err(_) => warn!(%value, "unparseable DESKTOP in xmessage"),
                    },
                    "PID" => match value.parse::<u32>() {
                        Ok(pid) if pid > 0 => {
                            data.pid = Some(pid);
                            pid_changed = true;
                        }
                        _ => warn!(%value, "unparseable PID in xmessage"),
                    },
                    _ => (),
                }
            }
        }

        if pid_changed {
            events.push((MonitorEventKind::PidChanged, sequence.clone()));
        }
        if workspace_changed {
            events.push((MonitorEventKind::WorkspaceChanged, sequence.clone()));
        }
    } else if prefix == "remove" {
        events.push((MonitorEventKind::Completed, sequence.clone()));
    }

    for (kind, seq) in events {
        dispatch(display, kind, CURRENT_TIME, None, Some(seq));
    }
}
