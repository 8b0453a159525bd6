//! Data types for working with X atoms
use strum::{AsRefStr, EnumIter, EnumString};

/// The X atoms interned and used by this crate.
///
/// Atom names are shared between all X11 API libraries so this enum allows us
/// to get a little bit of type safety around their use. Implementors of
/// [XConn][1] should intern the full set up front ([`Atom`] implements
/// `IntoEnumIterator`) so that no protocol operation needs an extra round
/// trip to the server.
///
/// [1]: crate::x::XConn
#[derive(AsRefStr, EnumString, EnumIter, Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Atom {
    /// UTF8_STRING
    #[strum(serialize = "UTF8_STRING")]
    UTF8String,
    /// _KDE_STARTUP_INFO
    #[strum(serialize = "_KDE_STARTUP_INFO")]
    KdeStartupInfo,
    /// _NET_LAUNCH_ID
    #[strum(serialize = "_NET_LAUNCH_ID")]
    NetLaunchId,
    /// _NET_LAUNCH_HOSTNAME
    #[strum(serialize = "_NET_LAUNCH_HOSTNAME")]
    NetLaunchHostname,
    /// _NET_LAUNCH_TYPE
    #[strum(serialize = "_NET_LAUNCH_TYPE")]
    NetLaunchType,
    /// _NET_LAUNCH_GEOMETRY
    #[strum(serialize = "_NET_LAUNCH_GEOMETRY")]
    NetLaunchGeometry,
    /// _NET_LAUNCH_GEOMETRY_WINDOW
    #[strum(serialize = "_NET_LAUNCH_GEOMETRY_WINDOW")]
    NetLaunchGeometryWindow,
    /// _NET_LAUNCH_SUPPORTS_CANCEL
    #[strum(serialize = "_NET_LAUNCH_SUPPORTS_CANCEL")]
    NetLaunchSupportsCancel,
    /// _NET_LAUNCH_NAME
    #[strum(serialize = "_NET_LAUNCH_NAME")]
    NetLaunchName,
    /// _NET_LAUNCH_DESCRIPTION
    #[strum(serialize = "_NET_LAUNCH_DESCRIPTION")]
    NetLaunchDescription,
    /// _NET_LAUNCH_DESKTOP
    #[strum(serialize = "_NET_LAUNCH_DESKTOP")]
    NetLaunchDesktop,
    /// _NET_LAUNCH_PID
    #[strum(serialize = "_NET_LAUNCH_PID")]
    NetLaunchPid,
    /// _NET_LAUNCH_BINARY_NAME
    #[strum(serialize = "_NET_LAUNCH_BINARY_NAME")]
    NetLaunchBinaryName,
    /// _NET_LAUNCH_ICON_NAME
    #[strum(serialize = "_NET_LAUNCH_ICON_NAME")]
    NetLaunchIconName,
    /// _NET_LAUNCH_LEGACY_RESOURCE_CLASS
    #[strum(serialize = "_NET_LAUNCH_LEGACY_RESOURCE_CLASS")]
    NetLaunchLegacyResourceClass,
    /// _NET_LAUNCH_LEGACY_RESOURCE_NAME
    #[strum(serialize = "_NET_LAUNCH_LEGACY_RESOURCE_NAME")]
    NetLaunchLegacyResourceName,
    /// _NET_LAUNCH_LEGACY_NAME
    #[strum(serialize = "_NET_LAUNCH_LEGACY_NAME")]
    NetLaunchLegacyName,
    /// _NET_LAUNCH_CANCELED
    #[strum(serialize = "_NET_LAUNCH_CANCELED")]
    NetLaunchCanceled,
    /// _NET_LAUNCH_COMPLETE
    #[strum(serialize = "_NET_LAUNCH_COMPLETE")]
    NetLaunchComplete,
    /// _NET_LAUNCH_INITIATE
    #[strum(serialize = "_NET_LAUNCH_INITIATE")]
    NetLaunchInitiate,
    /// _NET_LAUNCH_PULSE
    #[strum(serialize = "_NET_LAUNCH_PULSE")]
    NetLaunchPulse,

    // Launch types
    /// _NET_LAUNCH_TYPE_OTHER
    #[strum(serialize = "_NET_LAUNCH_TYPE_OTHER")]
    NetLaunchTypeOther,
    /// _NET_LAUNCH_TYPE_DOCK_ICON
    #[strum(serialize = "_NET_LAUNCH_TYPE_DOCK_ICON")]
    NetLaunchTypeDockIcon,
    /// _NET_LAUNCH_TYPE_DESKTOP_ICON
    #[strum(serialize = "_NET_LAUNCH_TYPE_DESKTOP_ICON")]
    NetLaunchTypeDesktopIcon,
    /// _NET_LAUNCH_TYPE_MENU
    #[strum(serialize = "_NET_LAUNCH_TYPE_MENU")]
    NetLaunchTypeMenu,
    /// _NET_LAUNCH_TYPE_KEY_SHORTCUT
    #[strum(serialize = "_NET_LAUNCH_TYPE_KEY_SHORTCUT")]
    NetLaunchTypeKeyShortcut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn atom_names_round_trip() {
        for atom in Atom::iter() {
            assert_eq!(Atom::from_str(atom.as_ref()), Ok(atom));
        }
    }
}
