//! The launchee side of the protocol: reporting progress on a launch
use crate::{
    display::Display,
    x::{prop, Atom, ClientMessage, ClientMessageData, XConn},
    Xid,
};
use std::env;
use tracing::trace;

/// The environment variable carrying the launch ID, exported verbatim.
pub const ENV_LAUNCH_ID: &str = "DESKTOP_LAUNCH_ID";

/// The environment variable carrying the launch window as a hexadecimal
/// integer with a leading `0x`.
pub const ENV_LAUNCH_WINDOW: &str = "DESKTOP_LAUNCH_WINDOW";

/// The launchee side of a launch sequence.
///
/// Held by the application that was launched. The context is normally
/// picked up from the environment variables exported by the launcher
/// ([from_environment][LauncheeContext::from_environment]); the launched
/// application then pulses during a long start up and finally calls
/// [complete][LauncheeContext::complete] once it is ready for use.
#[derive(Debug)]
pub struct LauncheeContext<X: XConn> {
    display: Display<X>,
    launch_id: String,
    launch_window: Xid,
}

impl<X: XConn> LauncheeContext<X> {
    /// Create a launchee context from an explicitly known launch ID and
    /// launch window.
    pub fn new(display: &Display<X>, launch_id: impl Into<String>, launch_window: Xid) -> Self {
        Self {
            display: display.clone(),
            launch_id: launch_id.into(),
            launch_window,
        }
    }

    /// Create a launchee context from `DESKTOP_LAUNCH_ID` and
    /// `DESKTOP_LAUNCH_WINDOW` in the process environment.
    ///
    /// Returns `None` when either variable is missing or the window does not
    /// parse as a non zero cardinal, meaning this process was not started as
    /// part of a launch sequence.
    pub fn from_environment(display: &Display<X>) -> Option<Self> {
        let id = env::var(ENV_LAUNCH_ID).ok()?;
        let window = parse_window(&env::var(ENV_LAUNCH_WINDOW).ok()?)?;

        Some(Self::new(display, id, window))
    }

    /// The launch ID of the sequence this process belongs to.
    pub fn launch_id(&self) -> &str {
        &self.launch_id
    }

    /// The launch window of the sequence this process belongs to.
    pub fn launch_window(&self) -> Xid {
        self.launch_window
    }

    /// Notify the launcher that progress is being made.
    ///
    /// Should be called regularly during a long launch so that feedback
    /// (busy cursors and the like) can distinguish a slow start from a hung
    /// one.
    pub fn pulse(&self) {
        let conn = self.display.conn();
        let msg = ClientMessage::new(
            self.launch_window,
            Atom::NetLaunchPulse.as_ref(),
            ClientMessageData::U32([0; 5]),
        );

        conn.push_error_trap();
        if let Err(e) = conn.send_client_message(self.launch_window, &msg) {
            trace!(%e, window = %self.launch_window, "unable to send launch pulse");
        }
        conn.flush();
        conn.pop_error_trap();
    }

    /// Cancel the launch.
    ///
    /// This will probably cause the launcher to kill this process.
    pub fn cancel(&self) {
        prop::set_cardinal(
            self.display.conn(),
            self.launch_window,
            Atom::NetLaunchCanceled,
            0,
        );
    }

    /// Mark the launch complete: this application is fully started up and
    /// launch feedback should end.
    pub fn complete(&self) {
        prop::set_cardinal(
            self.display.conn(),
            self.launch_window,
            Atom::NetLaunchComplete,
            0,
        );
    }

    /// Mark `window` as belonging to this launch sequence by setting
    /// `_NET_LAUNCH_ID` on it.
    ///
    /// The group leader windows of an application must be set up with this
    /// method so that monitors can associate them with the sequence.
    pub fn setup_window(&self, window: Xid) {
        prop::set_string(self.display.conn(), window, Atom::NetLaunchId, &self.launch_id);
    }
}

fn parse_window(s: &str) -> Option<Xid> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };

    match parsed {
        Ok(0) | Err(_) => None,
        Ok(w) => Some(Xid(w)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        launcher::{LauncherContext, LauncherEvent, LauncherEventKind},
        x::{mock::FakeServer, Prop, PropertyEvent, XEvent},
        CURRENT_TIME,
    };
    use simple_test_case::test_case;
    use std::{cell::RefCell, rc::Rc};

    #[test_case("0x2a", Some(Xid(42)); "lowercase hex")]
    #[test_case("0X2A", Some(Xid(42)); "uppercase hex")]
    #[test_case("42", Some(Xid(42)); "decimal")]
    #[test_case("0x0", None; "zero window")]
    #[test_case("0", None; "decimal zero")]
    #[test_case("not-a-window", None; "garbage")]
    #[test_case("", None; "empty")]
    #[test]
    fn window_parsing(s: &str, expected: Option<Xid>) {
        assert_eq!(parse_window(s), expected);
    }

    #[test]
    fn pulse_sends_a_client_message_to_the_launch_window() {
        let display = Display::new(FakeServer::new(1));
        let window = display.conn().add_window();
        let ctx = LauncheeContext::new(&display, "an-id", window);

        ctx.pulse();

        let sent = display.conn().sent();
        assert_eq!(sent.len(), 1);
        let (target, msg) = &sent[0];
        assert_eq!(*target, window);
        assert_eq!(msg.window, window);
        assert_eq!(msg.dtype, Atom::NetLaunchPulse.as_ref());
        assert_eq!(msg.data.words(), Some(&[0u32; 5]));
    }

    #[test]
    fn setup_window_marks_group_leaders() {
        let display = Display::new(FakeServer::new(1));
        let window = display.conn().add_window();
        let leader = display.conn().add_window();
        let ctx = LauncheeContext::new(&display, "an-id", window);

        ctx.setup_window(leader);

        assert_eq!(
            display.conn().prop(leader, Atom::NetLaunchId),
            Some(Prop::Str("an-id".to_string()))
        );
    }

    // This covers the full launcher / launchee handshake via the process
    // environment, so it is the single test that touches the env vars: the
    // test harness runs tests concurrently and the environment is shared.
    #[test]
    fn environment_handshake_completes_the_launcher() {
        let display = Display::new(FakeServer::new(1));

        let events = Rc::new(RefCell::new(Vec::new()));
        let events_in_cb = Rc::clone(&events);
        let launcher = LauncherContext::new(&display, move |_, ev: &LauncherEvent| {
            events_in_cb.borrow_mut().push(*ev)
        });
        launcher.initiate("test-launcher", "/bin/ls", 1234);
        launcher.setup_child_process();

        let launchee =
            LauncheeContext::from_environment(&display).expect("environment to be populated");
        assert_eq!(launchee.launch_id(), launcher.launch_id().unwrap());
        assert_eq!(launchee.launch_window(), launcher.launch_window().unwrap());

        launchee.complete();
        let completed = display.process_event(&XEvent::PropertyNotify(PropertyEvent {
            window: launchee.launch_window(),
            atom: Atom::NetLaunchComplete.as_ref().to_string(),
            time: CURRENT_TIME,
        }));

        assert!(completed);
        assert_eq!(
            *events.borrow(),
            vec![LauncherEvent {
                kind: LauncherEventKind::Completed,
                time: CURRENT_TIME
            }]
        );
        assert!(launcher.completed());
    }
}
