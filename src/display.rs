//! A shared handle over an X connection and the per-display protocol state
use crate::{
    launcher::{self, LauncherState},
    monitor::{self, MonitorState},
    x::{XConn, XEvent},
    xmessage::{self, HandlerToken, Router},
    LaunchSequence, Xid,
};
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

/// A shared handle over an X connection, holding the state that the launch
/// feedback protocol associates with that display.
///
/// `Display` is cheap to clone and every clone refers to the same underlying
/// state; launcher, launchee and monitor contexts each hold a clone, so the
/// display lives for as long as anything on it does. All launch sequence
/// bookkeeping is scoped to the display handle it was observed on.
///
/// The owner of the event loop must hand every event read from the server to
/// [process_event][Display::process_event].
pub struct Display<X: XConn> {
    inner: Rc<DisplayState<X>>,
}

impl<X: XConn> Clone for Display<X> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<X: XConn> std::fmt::Debug for Display<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Display")
            .field("screens", &self.inner.conn.screen_count())
            .finish_non_exhaustive()
    }
}

pub(crate) struct DisplayState<X: XConn> {
    pub(crate) conn: X,
    pub(crate) launchers: RefCell<Vec<Weak<LauncherState<X>>>>,
    pub(crate) monitors: RefCell<Vec<Weak<MonitorState<X>>>>,
    pub(crate) sequences: RefCell<Vec<LaunchSequence<X>>>,
    pub(crate) next_sequence_serial: Cell<u32>,
    pub(crate) monitor_route: Cell<Option<HandlerToken>>,
    pub(crate) xmessages: RefCell<Router<X>>,
}

impl<X: XConn> Display<X> {
    /// Wrap an X connection in a new `Display`.
    pub fn new(conn: X) -> Self {
        Self {
            inner: Rc::new(DisplayState {
                conn,
                launchers: RefCell::new(Vec::new()),
                monitors: RefCell::new(Vec::new()),
                sequences: RefCell::new(Vec::new()),
                next_sequence_serial: Cell::new(0),
                monitor_route: Cell::new(None),
                xmessages: RefCell::new(Router::new()),
            }),
        }
    }

    /// The underlying X connection.
    pub fn conn(&self) -> &X {
        &self.inner.conn
    }

    /// The number of screens available on this display.
    pub fn screen_count(&self) -> usize {
        self.inner.conn.screen_count()
    }

    /// The root window of screen `index`, or `None` if there is no such screen.
    pub fn root(&self, index: usize) -> Option<Xid> {
        self.inner.conn.root(index)
    }

    /// Begin ignoring X errors until the matching [error_trap_pop][Display::error_trap_pop].
    ///
    /// Pairs may be nested; see [XConn::push_error_trap].
    pub fn error_trap_push(&self) {
        self.inner.conn.push_error_trap();
    }

    /// Stop ignoring X errors; the outermost pop synchronizes with the server.
    pub fn error_trap_pop(&self) {
        self.inner.conn.pop_error_trap();
    }

    /// Offer an X event to the launch feedback protocol.
    ///
    /// The event is presented to the launcher, monitor and xmessage
    /// dispatchers in that order; each one sees every event, because a
    /// single client message can be relevant to more than one of them.
    /// Returns `true` if any dispatcher consumed the event as a property
    /// notify or client message belonging to the protocol. Window
    /// destruction events return `false` even when they complete a launch.
    pub fn process_event(&self, event: &XEvent) -> bool {
        let from_launcher = launcher::process_event(self, event);
        let from_monitor = monitor::process_event(self, event);
        let from_xmessage = xmessage::process_event(self, event);

        from_launcher || from_monitor || from_xmessage
    }

    pub(crate) fn state(&self) -> &DisplayState<X> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x::mock::FakeServer;

    #[test]
    fn clones_share_state() {
        let d1 = Display::new(FakeServer::new(1));
        let d2 = d1.clone();

        d1.state().next_sequence_serial.set(7);
        assert_eq!(d2.state().next_sequence_serial.get(), 7);
    }

    #[test]
    fn unknown_events_are_not_consumed() {
        let d = Display::new(FakeServer::new(1));
        assert!(!d.process_event(&XEvent::Destroy(Xid(99))));
    }
}
