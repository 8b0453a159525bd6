//! A mock implementation of XConn that is easier to implement for
//! use in tests.
//! This module and its contents are only available when testing.
use crate::{
    x::{Atom, ClientMessage, ClientMessageData, Prop, PropKind, RawProp, RawPropData, XConn, XEvent},
    Error, Result, Xid,
};
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
};
use strum::IntoEnumIterator;

/// All methods on this trait that return a Result will return
/// `Error::UnimplementedMock` by default unless an implementation is
/// provided. Trap pushes, pops and flushes are no-ops by default.
///
/// Any implementation of `MockXConn` will automatically implement [XConn] by
/// forwarding on calls to `$method` to `mock_$method`.
#[allow(unused_variables)]
pub trait MockXConn {
    fn mock_screen_count(&self) -> usize {
        1
    }

    fn mock_root(&self, index: usize) -> Option<Xid> {
        None
    }

    fn mock_push_error_trap(&self) {}

    fn mock_pop_error_trap(&self) {}

    fn mock_flush(&self) {}

    fn mock_known_atom(&self, id: Xid) -> Option<Atom> {
        None
    }

    fn mock_create_carrier_window(&self) -> Result<Xid> {
        Err(Error::UnimplementedMock)
    }

    fn mock_destroy_window(&self, id: Xid) -> Result<()> {
        Err(Error::UnimplementedMock)
    }

    fn mock_watch_window(&self, id: Xid) -> Result<()> {
        Err(Error::UnimplementedMock)
    }

    fn mock_get_property(
        &self,
        id: Xid,
        prop: Atom,
        kind: PropKind,
        max_words: u32,
    ) -> Result<Option<RawProp>> {
        Err(Error::UnimplementedMock)
    }

    fn mock_set_property(&self, id: Xid, prop: Atom, value: Prop) -> Result<()> {
        Err(Error::UnimplementedMock)
    }

    fn mock_send_client_message(&self, target: Xid, msg: &ClientMessage) -> Result<()> {
        Err(Error::UnimplementedMock)
    }
}

impl<T> XConn for T
where
    T: MockXConn,
{
    fn screen_count(&self) -> usize {
        self.mock_screen_count()
    }

    fn root(&self, index: usize) -> Option<Xid> {
        self.mock_root(index)
    }

    fn push_error_trap(&self) {
        self.mock_push_error_trap()
    }

    fn pop_error_trap(&self) {
        self.mock_pop_error_trap()
    }

    fn flush(&self) {
        self.mock_flush()
    }

    fn known_atom(&self, id: Xid) -> Option<Atom> {
        self.mock_known_atom(id)
    }

    fn create_carrier_window(&self) -> Result<Xid> {
        self.mock_create_carrier_window()
    }

    fn destroy_window(&self, id: Xid) -> Result<()> {
        self.mock_destroy_window(id)
    }

    fn watch_window(&self, id: Xid) -> Result<()> {
        self.mock_watch_window(id)
    }

    fn get_property(
        &self,
        id: Xid,
        prop: Atom,
        kind: PropKind,
        max_words: u32,
    ) -> Result<Option<RawProp>> {
        self.mock_get_property(id, prop, kind, max_words)
    }

    fn set_property(&self, id: Xid, prop: Atom, value: Prop) -> Result<()> {
        self.mock_set_property(id, prop, value)
    }

    fn send_client_message(&self, target: Xid, msg: &ClientMessage) -> Result<()> {
        self.mock_send_client_message(target, msg)
    }
}

// Mock atom IDs start here so that they can never collide with window IDs
// handed out by FakeServer.
const ATOM_ID_BASE: u32 = 100;
const WINDOW_ID_BASE: u32 = 1000;

/// An in-memory double of the parts of an X server this crate talks to:
/// windows, typed properties and client message delivery.
///
/// Property storage follows server semantics closely enough for codec tests:
/// reads only succeed when the stored type matches the requested kind and the
/// value is non-empty.
#[derive(Debug, Default)]
pub struct FakeServer {
    screens: usize,
    next_window: Cell<u32>,
    windows: RefCell<HashSet<Xid>>,
    props: RefCell<HashMap<(Xid, Atom), Prop>>,
    raw_props: RefCell<HashMap<(Xid, Atom), (PropKind, RawProp)>>,
    sent: RefCell<Vec<(Xid, ClientMessage)>>,
    watched: RefCell<Vec<Xid>>,
    destroyed: RefCell<Vec<Xid>>,
    trap_depth: Cell<isize>,
    traps_pushed: Cell<usize>,
}

impl FakeServer {
    pub fn new(screens: usize) -> Self {
        let s = FakeServer {
            screens,
            next_window: Cell::new(WINDOW_ID_BASE),
            ..Default::default()
        };

        let mut windows = s.windows.borrow_mut();
        for index in 0..screens {
            windows.insert(Xid(index as u32 + 1));
        }
        drop(windows);

        s
    }

    /// Register a new window as if a client had created it
    pub fn add_window(&self) -> Xid {
        let id = Xid(self.next_window.get());
        self.next_window.set(self.next_window.get() + 1);
        self.windows.borrow_mut().insert(id);

        id
    }

    /// The value currently stored for a property, if any
    pub fn prop(&self, id: Xid, prop: Atom) -> Option<Prop> {
        self.props.borrow().get(&(id, prop)).cloned()
    }

    /// Store a raw, uninterpreted property value, bypassing [Prop] typing.
    /// Used to simulate misbehaving clients (e.g. invalid UTF-8).
    pub fn set_raw_prop(&self, id: Xid, prop: Atom, kind: PropKind, raw: RawProp) {
        self.raw_props.borrow_mut().insert((id, prop), (kind, raw));
    }

    /// Every client message sent so far as (target, message) pairs
    pub fn sent(&self) -> Vec<(Xid, ClientMessage)> {
        self.sent.borrow().clone()
    }

    /// Drain the record of sent client messages
    pub fn take_sent(&self) -> Vec<(Xid, ClientMessage)> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub fn window_exists(&self, id: Xid) -> bool {
        self.windows.borrow().contains(&id)
    }

    pub fn watched(&self) -> Vec<Xid> {
        self.watched.borrow().clone()
    }

    pub fn destroyed(&self) -> Vec<Xid> {
        self.destroyed.borrow().clone()
    }

    pub fn trap_depth(&self) -> isize {
        self.trap_depth.get()
    }

    pub fn traps_pushed(&self) -> usize {
        self.traps_pushed.get()
    }

    fn atom_id(&self, atom: Atom) -> u32 {
        let index = Atom::iter().position(|a| a == atom).unwrap();
        ATOM_ID_BASE + index as u32
    }
}

impl MockXConn for FakeServer {
    fn mock_screen_count(&self) -> usize {
        self.screens
    }

    fn mock_root(&self, index: usize) -> Option<Xid> {
        if index < self.screens {
            Some(Xid(index as u32 + 1))
        } else {
            None
        }
    }

    fn mock_push_error_trap(&self) {
        self.trap_depth.set(self.trap_depth.get() + 1);
        self.traps_pushed.set(self.traps_pushed.get() + 1);
    }

    fn mock_pop_error_trap(&self) {
        self.trap_depth.set(self.trap_depth.get() - 1);
        assert!(self.trap_depth.get() >= 0, "unbalanced error trap pop");
    }

    fn mock_known_atom(&self, id: Xid) -> Option<Atom> {
        let index = id.0.checked_sub(ATOM_ID_BASE)? as usize;
        Atom::iter().nth(index)
    }

    fn mock_create_carrier_window(&self) -> Result<Xid> {
        Ok(self.add_window())
    }

    fn mock_destroy_window(&self, id: Xid) -> Result<()> {
        if !self.windows.borrow_mut().remove(&id) {
            return Err(Error::UnknownWindow(id));
        }
        self.props.borrow_mut().retain(|(w, _), _| *w != id);
        self.destroyed.borrow_mut().push(id);

        Ok(())
    }

    fn mock_watch_window(&self, id: Xid) -> Result<()> {
        if !self.window_exists(id) {
            return Err(Error::UnknownWindow(id));
        }
        self.watched.borrow_mut().push(id);

        Ok(())
    }

    fn mock_get_property(
        &self,
        id: Xid,
        prop: Atom,
        kind: PropKind,
        _max_words: u32,
    ) -> Result<Option<RawProp>> {
        if !self.window_exists(id) {
            // under an error trap a BadWindow reads as absent
            return Ok(None);
        }

        if let Some((stored_kind, raw)) = self.raw_props.borrow().get(&(id, prop)) {
            if *stored_kind == kind {
                return Ok(Some(raw.clone()));
            }
            return Ok(None);
        }

        let value = match self.props.borrow().get(&(id, prop)) {
            Some(value) => value.clone(),
            None => return Ok(None),
        };

        let raw = match (kind, value) {
            (PropKind::Str, Prop::Str(s)) => RawProp {
                format: 8,
                data: RawPropData::Bytes(s.into_bytes()),
            },
            (PropKind::Utf8Str, Prop::Utf8Str(s)) => RawProp {
                format: 8,
                data: RawPropData::Bytes(s.into_bytes()),
            },
            (PropKind::Cardinal, Prop::Cardinal(v)) => RawProp {
                format: 32,
                data: RawPropData::Words(vec![v]),
            },
            (PropKind::Cardinal, Prop::Cardinals(vs)) => RawProp {
                format: 32,
                data: RawPropData::Words(vs),
            },
            (PropKind::Window, Prop::Window(w)) => RawProp {
                format: 32,
                data: RawPropData::Words(vec![w.0]),
            },
            (PropKind::Atoms, Prop::Atoms(atoms)) => RawProp {
                format: 32,
                data: RawPropData::Words(atoms.iter().map(|a| self.atom_id(*a)).collect()),
            },
            _ => return Ok(None), // type mismatch
        };

        let empty = match &raw.data {
            RawPropData::Bytes(b) => b.is_empty(),
            RawPropData::Shorts(s) => s.is_empty(),
            RawPropData::Words(w) => w.is_empty(),
        };

        Ok(if empty { None } else { Some(raw) })
    }

    fn mock_set_property(&self, id: Xid, prop: Atom, value: Prop) -> Result<()> {
        if !self.window_exists(id) {
            return Err(Error::UnknownWindow(id));
        }
        self.props.borrow_mut().insert((id, prop), value);

        Ok(())
    }

    fn mock_send_client_message(&self, target: Xid, msg: &ClientMessage) -> Result<()> {
        if !self.window_exists(target) {
            return Err(Error::UnknownWindow(target));
        }
        self.sent.borrow_mut().push((target, msg.clone()));

        Ok(())
    }
}

/// Split a payload into the train of format 8 client message events its
/// broadcast would produce: consecutive 20 byte windows over the bytes of
/// the payload plus its terminating NUL.
pub fn xmessage_fragments(window: Xid, dtype: &str, payload: &str) -> Vec<XEvent> {
    let mut bytes = payload.as_bytes().to_vec();
    bytes.push(0);

    bytes
        .chunks(20)
        .map(|chunk| {
            let mut data = [0u8; 20];
            data[..chunk.len()].copy_from_slice(chunk);
            XEvent::ClientMessage(ClientMessage::new(window, dtype, ClientMessageData::U8(data)))
        })
        .collect()
}
