//! Logic for interacting with the X server
use crate::{Result, Xid};

pub mod atom;
pub mod event;
pub mod prop;

#[cfg(test)]
pub mod mock;

pub use atom::Atom;
pub use event::{ClientMessage, ClientMessageData, PropertyEvent, XEvent};
pub use prop::{Prop, PropKind, RawProp, RawPropData};

/// A handle on a running X11 connection that we can use for issuing X requests.
///
/// XConn is the seam between the launch feedback protocol and the display
/// system: [Display][crate::Display] and the launcher / launchee / monitor
/// contexts only ever talk to the server through this trait, which keeps the
/// protocol state machine testable without a running server. An
/// implementation backed by x11rb is provided behind the `x11rb` feature.
///
/// ### The error trap discipline
///
/// Launch windows belong to other processes and can be destroyed at any
/// moment, so nearly every request made by this crate races a `BadWindow`
/// error. `push_error_trap` must cause X errors to be ignored until
/// `pop_error_trap` has been called as many times as `push_error_trap` has
/// been (nested pairs must be supported), and the outermost pop must
/// synchronize with the server so that every error that will occur has in
/// fact occurred.
pub trait XConn {
    /// The number of screens available on this display
    fn screen_count(&self) -> usize;

    /// The root window of screen `index`, or `None` if there is no such screen
    fn root(&self, index: usize) -> Option<Xid>;

    /// Begin ignoring X errors until the matching [pop_error_trap][XConn::pop_error_trap]
    fn push_error_trap(&self);

    /// Stop ignoring X errors; the outermost pop synchronizes with the server
    fn pop_error_trap(&self);

    /// Flush any pending requests to the X server
    fn flush(&self);

    /// Resolve a pre-interned protocol atom ID back to its [Atom], if it is one
    fn known_atom(&self, id: Xid) -> Option<Atom>;

    /// Create an unmapped override-redirect window on the default screen.
    ///
    /// Carrier windows exist only as an identity object and a surface for
    /// protocol properties; they select `PropertyChange` and
    /// `StructureNotify` input and are never mapped.
    fn create_carrier_window(&self) -> Result<Xid>;

    /// Destroy a window previously created with
    /// [create_carrier_window][XConn::create_carrier_window]
    fn destroy_window(&self, id: Xid) -> Result<()>;

    /// Select `PropertyChange` and `StructureNotify` input on a window owned
    /// by another client
    fn watch_window(&self, id: Xid) -> Result<()>;

    /// Read a property of the requested [PropKind] from a window.
    ///
    /// Returns `Ok(None)` when the property is unset, when its type does not
    /// match the requested kind, or when the window is gone. At most
    /// `max_words` 32-bit units of data are requested.
    fn get_property(
        &self,
        id: Xid,
        prop: Atom,
        kind: PropKind,
        max_words: u32,
    ) -> Result<Option<RawProp>>;

    /// Replace a property on a window with a typed value
    fn set_property(&self, id: Xid, prop: Atom, value: Prop) -> Result<()>;

    /// Send a [ClientMessage] to the given target window.
    ///
    /// Messages are sent without propagation using a `PropertyChange` event
    /// mask, which is what every message in this protocol uses.
    fn send_client_message(&self, target: Xid, msg: &ClientMessage) -> Result<()>;
}

/// An RAII error trap: pushed on construction, popped on drop.
pub(crate) struct ErrorTrap<'x, X: XConn>(&'x X);

impl<'x, X: XConn> ErrorTrap<'x, X> {
    pub(crate) fn new(x: &'x X) -> Self {
        x.push_error_trap();
        Self(x)
    }
}

impl<'x, X: XConn> Drop for ErrorTrap<'x, X> {
    fn drop(&mut self) {
        self.0.pop_error_trap();
    }
}

/// Send the same [ClientMessage] to the root window of every screen.
pub(crate) fn broadcast_to_roots<X: XConn>(x: &X, msg: &ClientMessage) -> Result<()> {
    for index in 0..x.screen_count() {
        if let Some(root) = x.root(index) {
            x.send_client_message(root, msg)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock::FakeServer;

    #[test]
    fn error_traps_nest() {
        let s = FakeServer::new(1);
        {
            let _outer = ErrorTrap::new(&s);
            assert_eq!(s.trap_depth(), 1);
            {
                let _inner = ErrorTrap::new(&s);
                assert_eq!(s.trap_depth(), 2);
            }
            assert_eq!(s.trap_depth(), 1);
        }
        assert_eq!(s.trap_depth(), 0);
    }

    #[test]
    fn broadcast_hits_every_root() {
        let s = FakeServer::new(3);
        let msg = ClientMessage::new(Xid(9), "_NET_LAUNCH_PULSE", [0u32; 5]);
        broadcast_to_roots(&s, &msg).unwrap();

        let targets: Vec<Xid> = s.sent().into_iter().map(|(target, _)| target).collect();
        let roots: Vec<Xid> = (0..3).map(|i| s.root(i).unwrap()).collect();
        assert_eq!(targets, roots);
    }
}
