//! # startup-notify: launch feedback for X11
//!
//! This crate implements the desktop startup notification protocol: the
//! coordination of user visible feedback (busy cursors, task bar entries)
//! while an application is being launched on an X display.
//!
//! Three peer roles cooperate over X window properties and client messages:
//!
//!   - a **launcher** (file manager, menu, dock) announces a launch with
//!     [`LauncherContext`], attaches metadata and later marks the launch
//!     complete or canceled;
//!   - the **launchee** (the program being started) picks the launch up from
//!     its environment with [`LauncheeContext`] and reports progress;
//!   - a **monitor** (window manager, task bar) observes every in flight
//!     launch on the display through [`MonitorContext`] and receives typed
//!     events about each [`LaunchSequence`].
//!
//! The X connection itself is abstracted behind the [`x::XConn`] trait so
//! that the protocol logic is testable without a running server; an
//! implementation backed by the [x11rb][0] crate is provided behind the
//! default `x11rb` feature. Callers own the event loop: every event read
//! from the server should be handed to [`Display::process_event`].
//!
//! [0]: https://crates.io/crates/x11rb
#![warn(
    clippy::complexity,
    clippy::correctness,
    clippy::style,
    future_incompatible,
    missing_docs,
    rust_2018_idioms,
    rustdoc::all
)]

pub mod display;
pub mod launchee;
pub mod launcher;
pub mod monitor;
pub mod wire;
pub mod x;
pub mod xmessage;

#[cfg(feature = "x11rb")]
pub mod x11rb;

pub use display::Display;
pub use launchee::LauncheeContext;
pub use launcher::{LauncherContext, LauncherEvent, LauncherEventKind};
pub use monitor::{LaunchSequence, MonitorContext, MonitorEvent, MonitorEventKind};

use crate::x::Atom;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// A Result type for fallible methods within this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error variants from the core startup-notify library.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A window ID passed to the X server was not known to it
    #[error("the window {0} is not known to the X server")]
    UnknownWindow(Xid),

    /// An attempt was made to use an un-implemented mock method
    #[error("mock method not implemented")]
    UnimplementedMock,

    /// An error was returned by the x11rb backed [`x::XConn`] implementation
    #[cfg(feature = "x11rb")]
    #[error(transparent)]
    X11rb(#[from] crate::x11rb::X11rbError),
}

/// An X11 ID for a given resource
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct Xid(pub(crate) u32);

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for Xid {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u32> for Xid {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<Xid> for u32 {
    fn from(id: Xid) -> Self {
        id.0
    }
}

/// An X server timestamp in milliseconds of server uptime
pub type Time = u32;

/// The X server `CurrentTime` sentinel, used when no real timestamp is known
pub const CURRENT_TIME: Time = 0;

/// An on screen position and size hint, as carried in `_NET_LAUNCH_GEOMETRY`.
///
/// The values are raw protocol cardinals: no coordinate system conversion is
/// applied by this crate.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    /// The x position of the top left corner
    pub x: u32,
    /// The y position of the top left corner
    pub y: u32,
    /// The width
    pub w: u32,
    /// The height
    pub h: u32,
}

impl Rect {
    /// Create a new [Rect] from its component parts
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

/// The kind of user action that initiated a launch sequence.
///
/// Advertised by the launcher as a single atom in `_NET_LAUNCH_TYPE` so that
/// monitors can choose an appropriate style of feedback.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchType {
    /// Anything not covered by the other variants
    #[default]
    Other,
    /// The user activated an icon in a dock or task bar
    DockIcon,
    /// The user activated an icon on the desktop
    DesktopIcon,
    /// The user picked a menu entry
    Menu,
    /// The user pressed a launch key binding
    KeyShortcut,
}

impl LaunchType {
    pub(crate) fn atom(&self) -> Atom {
        match self {
            LaunchType::Other => Atom::NetLaunchTypeOther,
            LaunchType::DockIcon => Atom::NetLaunchTypeDockIcon,
            LaunchType::DesktopIcon => Atom::NetLaunchTypeDesktopIcon,
            LaunchType::Menu => Atom::NetLaunchTypeMenu,
            LaunchType::KeyShortcut => Atom::NetLaunchTypeKeyShortcut,
        }
    }

    pub(crate) fn from_atom(atom: Atom) -> Self {
        match atom {
            Atom::NetLaunchTypeDockIcon => LaunchType::DockIcon,
            Atom::NetLaunchTypeDesktopIcon => LaunchType::DesktopIcon,
            Atom::NetLaunchTypeMenu => LaunchType::Menu,
            Atom::NetLaunchTypeKeyShortcut => LaunchType::KeyShortcut,
            _ => LaunchType::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case(LaunchType::Other; "other")]
    #[test_case(LaunchType::DockIcon; "dock icon")]
    #[test_case(LaunchType::DesktopIcon; "desktop icon")]
    #[test_case(LaunchType::Menu; "menu")]
    #[test_case(LaunchType::KeyShortcut; "key shortcut")]
    #[test]
    fn launch_type_round_trips_through_its_atom(ty: LaunchType) {
        assert_eq!(LaunchType::from_atom(ty.atom()), ty);
    }

    #[test]
    fn unknown_type_atoms_read_as_other() {
        assert_eq!(LaunchType::from_atom(Atom::NetLaunchId), LaunchType::Other);
    }
}
