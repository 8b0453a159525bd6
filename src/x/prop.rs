//! Typed reading and writing of X window properties
//!
//! Everything in the launch feedback protocol that is not a client message is
//! carried as a typed property on the launch window. The functions in this
//! module bracket every server request with an error trap so that a launch
//! window disappearing mid-operation can never kill the client, and they
//! treat every failure mode (X error, wrong type, wrong format, zero items,
//! invalid UTF-8) as "property absent".
use crate::{
    x::{Atom, ErrorTrap, XConn},
    Xid,
};
use tracing::{trace, warn};

// Request length caps, in 32-bit units, bounding per-call memory.
const MAX_SCALAR_WORDS: u32 = 256;
const MAX_LIST_WORDS: u32 = 1000;
const MAX_STRING_WORDS: u32 = 20000 / 4;

/// A typed value to be written to an X window property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Prop {
    /// One or more X atoms (type `ATOM`, format 32)
    Atoms(Vec<Atom>),
    /// A single cardinal number (type `CARDINAL`, format 32)
    Cardinal(u32),
    /// A list of cardinal numbers (type `CARDINAL`, format 32)
    Cardinals(Vec<u32>),
    /// Latin-1 / ASCII string data (type `STRING`, format 8)
    Str(String),
    /// UTF-8 encoded string data (type `UTF8_STRING`, format 8)
    Utf8Str(String),
    /// An X window ID (type `WINDOW`, format 32)
    Window(Xid),
}

/// The property type requested from the X server by a read.
///
/// The server only returns data when the stored property has exactly this
/// type; anything else reads as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKind {
    /// type `STRING`
    Str,
    /// type `UTF8_STRING`
    Utf8Str,
    /// type `CARDINAL`
    Cardinal,
    /// type `WINDOW`
    Window,
    /// type `ATOM`
    Atoms,
}

impl PropKind {
    /// The name of the X type atom requested for this kind of read
    pub fn type_name(&self) -> &'static str {
        match self {
            PropKind::Str => "STRING",
            PropKind::Utf8Str => "UTF8_STRING",
            PropKind::Cardinal => "CARDINAL",
            PropKind::Window => "WINDOW",
            PropKind::Atoms => "ATOM",
        }
    }
}

/// An uninterpreted property value as returned by the X server.
///
/// [XConn] implementations return `None` for an unset property or one whose
/// type does not match the requested [PropKind]; interpretation of the raw
/// data is left to this module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawProp {
    /// The format of the stored property: 8, 16 or 32
    pub format: u8,
    /// The property data
    pub data: RawPropData,
}

/// Raw property data in the unit width given by the property format
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawPropData {
    /// Format 8 data
    Bytes(Vec<u8>),
    /// Format 16 data
    Shorts(Vec<u16>),
    /// Format 32 data
    Words(Vec<u32>),
}

fn write<X: XConn>(x: &X, id: Xid, prop: Atom, value: Prop) {
    let _trap = ErrorTrap::new(x);
    if let Err(e) = x.set_property(id, prop, value) {
        trace!(%e, %id, prop = prop.as_ref(), "unable to set property");
    }
}

pub(crate) fn set_string<X: XConn>(x: &X, id: Xid, prop: Atom, s: &str) {
    write(x, id, prop, Prop::Str(s.to_string()));
}

pub(crate) fn set_utf8_string<X: XConn>(x: &X, id: Xid, prop: Atom, s: &str) {
    write(x, id, prop, Prop::Utf8Str(s.to_string()));
}

pub(crate) fn set_cardinal<X: XConn>(x: &X, id: Xid, prop: Atom, val: u32) {
    write(x, id, prop, Prop::Cardinal(val));
}

pub(crate) fn set_cardinal_list<X: XConn>(x: &X, id: Xid, prop: Atom, vals: &[u32]) {
    write(x, id, prop, Prop::Cardinals(vals.to_vec()));
}

pub(crate) fn set_window<X: XConn>(x: &X, id: Xid, prop: Atom, val: Xid) {
    write(x, id, prop, Prop::Window(val));
}

pub(crate) fn set_atom_list<X: XConn>(x: &X, id: Xid, prop: Atom, vals: &[Atom]) {
    write(x, id, prop, Prop::Atoms(vals.to_vec()));
}

fn read<X: XConn>(x: &X, id: Xid, prop: Atom, kind: PropKind, max_words: u32) -> Option<RawProp> {
    let _trap = ErrorTrap::new(x);
    match x.get_property(id, prop, kind, max_words) {
        Ok(maybe_raw) => maybe_raw,
        Err(e) => {
            trace!(%e, %id, prop = prop.as_ref(), "unable to read property");
            None
        }
    }
}

pub(crate) fn get_cardinal<X: XConn>(x: &X, id: Xid, prop: Atom) -> Option<u32> {
    match read(x, id, prop, PropKind::Cardinal, MAX_SCALAR_WORDS)? {
        RawProp {
            format: 32,
            data: RawPropData::Words(words),
        } if !words.is_empty() => Some(words[0]),
        _ => None,
    }
}

pub(crate) fn get_window<X: XConn>(x: &X, id: Xid, prop: Atom) -> Option<Xid> {
    match read(x, id, prop, PropKind::Window, MAX_SCALAR_WORDS)? {
        RawProp {
            format: 32,
            data: RawPropData::Words(words),
        } if !words.is_empty() => Some(Xid(words[0])),
        _ => None,
    }
}

pub(crate) fn get_cardinal_list<X: XConn>(x: &X, id: Xid, prop: Atom) -> Option<Vec<u32>> {
    match read(x, id, prop, PropKind::Cardinal, MAX_LIST_WORDS)? {
        RawProp {
            format: 32,
            data: RawPropData::Words(words),
        } if !words.is_empty() => Some(words),
        _ => None,
    }
}

pub(crate) fn get_atom_list<X: XConn>(x: &X, id: Xid, prop: Atom) -> Option<Vec<Atom>> {
    let words = match read(x, id, prop, PropKind::Atoms, MAX_LIST_WORDS)? {
        RawProp {
            format: 32,
            data: RawPropData::Words(words),
        } if !words.is_empty() => words,
        _ => return None,
    };

    let atoms: Vec<Atom> = words
        .into_iter()
        .filter_map(|w| {
            let atom = x.known_atom(Xid(w));
            if atom.is_none() {
                trace!(id = w, "skipping atom not used by the launch protocol");
            }
            atom
        })
        .collect();

    if atoms.is_empty() {
        None
    } else {
        Some(atoms)
    }
}

fn string_from_bytes(bytes: Vec<u8>, id: Xid, prop: Atom) -> Option<String> {
    // Property strings are not NUL terminated but some clients write a
    // trailing NUL anyway; everything after the first NUL is dropped.
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    match std::str::from_utf8(&bytes[..end]) {
        Ok(s) => Some(s.to_string()),
        Err(_) => {
            warn!(%id, prop = prop.as_ref(), "invalid UTF-8 in property");
            None
        }
    }
}

pub(crate) fn get_string<X: XConn>(x: &X, id: Xid, prop: Atom) -> Option<String> {
    match read(x, id, prop, PropKind::Str, MAX_STRING_WORDS)? {
        RawProp {
            format: 8,
            data: RawPropData::Bytes(bytes),
        } if !bytes.is_empty() => string_from_bytes(bytes, id, prop),
        _ => None,
    }
}

pub(crate) fn get_utf8_string<X: XConn>(x: &X, id: Xid, prop: Atom) -> Option<String> {
    match read(x, id, prop, PropKind::Utf8Str, MAX_STRING_WORDS)? {
        RawProp {
            format: 8,
            data: RawPropData::Bytes(bytes),
        } if !bytes.is_empty() => string_from_bytes(bytes, id, prop),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x::mock::FakeServer;
    use simple_test_case::test_case;

    fn server_and_window() -> (FakeServer, Xid) {
        let s = FakeServer::new(1);
        let w = s.add_window();
        (s, w)
    }

    #[test]
    fn cardinal_round_trips() {
        let (s, w) = server_and_window();
        set_cardinal(&s, w, Atom::NetLaunchPid, 42);
        assert_eq!(get_cardinal(&s, w, Atom::NetLaunchPid), Some(42));
    }

    #[test]
    fn window_round_trips() {
        let (s, w) = server_and_window();
        set_window(&s, w, Atom::NetLaunchGeometryWindow, Xid(77));
        assert_eq!(
            get_window(&s, w, Atom::NetLaunchGeometryWindow),
            Some(Xid(77))
        );
    }

    #[test]
    fn cardinal_list_round_trips() {
        let (s, w) = server_and_window();
        set_cardinal_list(&s, w, Atom::NetLaunchGeometry, &[1, 2, 3, 4]);
        assert_eq!(
            get_cardinal_list(&s, w, Atom::NetLaunchGeometry),
            Some(vec![1, 2, 3, 4])
        );
    }

    #[test]
    fn atom_list_round_trips() {
        let (s, w) = server_and_window();
        set_atom_list(&s, w, Atom::NetLaunchType, &[Atom::NetLaunchTypeMenu]);
        assert_eq!(
            get_atom_list(&s, w, Atom::NetLaunchType),
            Some(vec![Atom::NetLaunchTypeMenu])
        );
    }

    #[test_case("launch feedback"; "ascii")]
    #[test_case(""; "empty read fails as zero items")]
    #[test]
    fn utf8_string_round_trips(s: &str) {
        let (server, w) = server_and_window();
        set_utf8_string(&server, w, Atom::NetLaunchName, s);
        let expected = if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        };
        assert_eq!(get_utf8_string(&server, w, Atom::NetLaunchName), expected);
    }

    #[test]
    fn absent_property_reads_as_none() {
        let (s, w) = server_and_window();
        assert_eq!(get_cardinal(&s, w, Atom::NetLaunchPid), None);
        assert_eq!(get_string(&s, w, Atom::NetLaunchBinaryName), None);
    }

    #[test]
    fn mismatched_type_reads_as_none() {
        let (s, w) = server_and_window();
        set_cardinal(&s, w, Atom::NetLaunchName, 1);
        assert_eq!(get_utf8_string(&s, w, Atom::NetLaunchName), None);
    }

    #[test]
    fn invalid_utf8_reads_as_none() {
        let (s, w) = server_and_window();
        s.set_raw_prop(
            w,
            Atom::NetLaunchName,
            PropKind::Utf8Str,
            RawProp {
                format: 8,
                data: RawPropData::Bytes(vec![0xff, 0xfe, 0xfd]),
            },
        );
        assert_eq!(get_utf8_string(&s, w, Atom::NetLaunchName), None);
    }

    #[test]
    fn reads_are_trap_bracketed() {
        let (s, w) = server_and_window();
        get_cardinal(&s, w, Atom::NetLaunchPid);
        assert_eq!(s.trap_depth(), 0);
        assert!(s.traps_pushed() > 0);
    }
}
