//! API wrapper for talking to the X server using x11rb
use crate::{
    x::{Atom, ClientMessage, ClientMessageData, Prop, PropKind, PropertyEvent, RawProp,
        RawPropData, XConn, XEvent},
    x11rb::{Result as X11Result, X11rbError},
    Result, Xid,
};
use std::{cell::Cell, collections::HashMap, str::FromStr};
use strum::IntoEnumIterator;
use tracing::warn;
use x11rb::{
    connection::Connection,
    protocol::{
        xproto::{
            AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConnectionExt as _,
            CreateWindowAux, EventMask, PropMode, WindowClass, CLIENT_MESSAGE_EVENT,
        },
        Event,
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as _,
};

/// Handles communication with an X server via the x11rb crate.
///
/// All of the protocol atoms are interned up front with a single round trip
/// so that no later operation needs to ask the server for an atom.
#[derive(Debug)]
pub struct X11rbConn<C: Connection> {
    conn: C,
    roots: Vec<Xid>,
    atoms: HashMap<Atom, u32>,
    trap_depth: Cell<usize>,
}

impl X11rbConn<RustConnection> {
    /// Connect to the X server using the `DISPLAY` environment variable.
    pub fn new() -> Result<Self> {
        let (conn, _) = ::x11rb::connect(None).map_err(X11rbError::from)?;

        Self::new_for_connection(conn)
    }
}

impl<C: Connection> X11rbConn<C> {
    /// Wrap an existing x11rb connection.
    pub fn new_for_connection(conn: C) -> Result<Self> {
        let roots = conn.setup().roots.iter().map(|s| Xid(s.root)).collect();

        // First send all of the InternAtom requests and then fetch the
        // replies, so that we only pay for one round trip to the server
        let cookies = Atom::iter()
            .map(|atom| Ok((atom, conn.intern_atom(false, atom.as_ref().as_bytes())?)))
            .collect::<X11Result<Vec<_>>>()?;
        let atoms = cookies
            .into_iter()
            .map(|(atom, cookie)| Ok((atom, cookie.reply()?.atom)))
            .collect::<X11Result<HashMap<_, _>>>()?;

        Ok(Self {
            conn,
            roots,
            atoms,
            trap_depth: Cell::new(0),
        })
    }

    /// The underlying x11rb connection.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    fn known(&self, atom: Atom) -> u32 {
        *self.atoms.get(&atom).expect("all atoms interned at startup")
    }

    fn known_name(&self, id: u32) -> Option<Atom> {
        self.atoms
            .iter()
            .find(|(_, value)| id == **value)
            .map(|(key, _)| *key)
    }

    // Resolve an atom to its name: our pre-interned map first, the server
    // otherwise (client messages may carry types we did not intern).
    fn atom_name(&self, id: u32) -> Option<String> {
        if let Some(atom) = self.known_name(id) {
            return Some(atom.as_ref().to_string());
        }

        self.conn
            .get_atom_name(id)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .and_then(|reply| String::from_utf8(reply.name).ok())
    }

    /// Convert a raw x11rb event into the [XEvent] form consumed by
    /// [Display::process_event][crate::Display::process_event].
    ///
    /// Returns `None` for event types that can never be part of the launch
    /// feedback protocol, and for property notifies on atoms the protocol
    /// does not use.
    pub fn convert_event(&self, event: &Event) -> Option<XEvent> {
        match event {
            Event::ClientMessage(ev) => {
                let dtype = self.atom_name(ev.type_)?;
                let data = match ev.format {
                    8 => ClientMessageData::U8(ev.data.as_data8()),
                    32 => ClientMessageData::U32(ev.data.as_data32()),
                    _ => return None,
                };

                Some(XEvent::ClientMessage(ClientMessage::new(
                    Xid(ev.window),
                    dtype,
                    data,
                )))
            }

            Event::PropertyNotify(ev) => {
                let atom = self.known_name(ev.atom)?;

                Some(XEvent::PropertyNotify(PropertyEvent {
                    window: Xid(ev.window),
                    atom: atom.as_ref().to_string(),
                    time: ev.time,
                }))
            }

            Event::DestroyNotify(ev) => Some(XEvent::Destroy(Xid(ev.window))),

            _ => None,
        }
    }
}

fn carrier_event_mask() -> EventMask {
    EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY
}

impl<C: Connection> XConn for X11rbConn<C> {
    fn screen_count(&self) -> usize {
        self.roots.len()
    }

    fn root(&self, index: usize) -> Option<Xid> {
        self.roots.get(index).copied()
    }

    fn push_error_trap(&self) {
        self.trap_depth.set(self.trap_depth.get() + 1);
    }

    fn pop_error_trap(&self) {
        let depth = self.trap_depth.get();
        if depth == 0 {
            warn!("unbalanced error trap pop");
            return;
        }

        self.trap_depth.set(depth - 1);
        if depth == 1 {
            // the outermost pop synchronizes so that every error that is
            // going to happen has happened before the caller continues
            if let Ok(cookie) = self.conn.get_input_focus() {
                let _ = cookie.reply();
            }
        }
    }

    fn flush(&self) {
        let _ = self.conn.flush();
    }

    fn known_atom(&self, id: Xid) -> Option<Atom> {
        self.known_name(id.0)
    }

    fn create_carrier_window(&self) -> Result<Xid> {
        let id = self.conn.generate_id().map_err(X11rbError::from)?;
        let aux = CreateWindowAux::new()
            .override_redirect(1)
            .event_mask(carrier_event_mask());

        self.conn
            .create_window(
                x11rb::COPY_DEPTH_FROM_PARENT,
                id,
                self.roots[0].0,
                -100,
                -100,
                1,
                1,
                0,
                WindowClass::COPY_FROM_PARENT,
                x11rb::COPY_FROM_PARENT,
                &aux,
            )
            .map_err(X11rbError::from)?;

        Ok(Xid(id))
    }

    fn destroy_window(&self, id: Xid) -> Result<()> {
        self.conn.destroy_window(id.0).map_err(X11rbError::from)?;

        Ok(())
    }

    fn watch_window(&self, id: Xid) -> Result<()> {
        let aux = ChangeWindowAttributesAux::new().event_mask(carrier_event_mask());
        self.conn
            .change_window_attributes(id.0, &aux)
            .map_err(X11rbError::from)?;

        Ok(())
    }

    fn get_property(
        &self,
        id: Xid,
        prop: Atom,
        kind: PropKind,
        max_words: u32,
    ) -> Result<Option<RawProp>> {
        let type_atom: u32 = match kind {
            PropKind::Str => AtomEnum::STRING.into(),
            PropKind::Utf8Str => self.known(Atom::UTF8String),
            PropKind::Cardinal => AtomEnum::CARDINAL.into(),
            PropKind::Window => AtomEnum::WINDOW.into(),
            PropKind::Atoms => AtomEnum::ATOM.into(),
        };

        let cookie = self
            .conn
            .get_property(false, id.0, self.known(prop), type_atom, 0, max_words)
            .map_err(X11rbError::from)?;

        // an error reply here is a vanished window: reads as absent
        let reply = match cookie.reply() {
            Ok(reply) => reply,
            Err(_) => return Ok(None),
        };

        if reply.type_ != type_atom || reply.value.is_empty() {
            return Ok(None);
        }

        let data = match reply.format {
            8 => RawPropData::Bytes(reply.value),
            16 => RawPropData::Shorts(reply.value16().map(|v| v.collect()).unwrap_or_default()),
            32 => RawPropData::Words(reply.value32().map(|v| v.collect()).unwrap_or_default()),
            _ => return Ok(None),
        };

        Ok(Some(RawProp {
            format: reply.format,
            data,
        }))
    }

    fn set_property(&self, id: Xid, prop: Atom, value: Prop) -> Result<()> {
        let prop = self.known(prop);
        let mode = PropMode::REPLACE;

        match value {
            Prop::Str(s) => {
                self.conn
                    .change_property8(mode, id.0, prop, AtomEnum::STRING, s.as_bytes())
            }
            Prop::Utf8Str(s) => self.conn.change_property8(
                mode,
                id.0,
                prop,
                self.known(Atom::UTF8String),
                s.as_bytes(),
            ),
            Prop::Cardinal(v) => {
                self.conn
                    .change_property32(mode, id.0, prop, AtomEnum::CARDINAL, &[v])
            }
            Prop::Cardinals(vs) => {
                self.conn
                    .change_property32(mode, id.0, prop, AtomEnum::CARDINAL, &vs)
            }
            Prop::Window(w) => {
                self.conn
                    .change_property32(mode, id.0, prop, AtomEnum::WINDOW, &[w.0])
            }
            Prop::Atoms(atoms) => {
                let ids: Vec<u32> = atoms.iter().map(|a| self.known(*a)).collect();
                self.conn
                    .change_property32(mode, id.0, prop, AtomEnum::ATOM, &ids)
            }
        }
        .map_err(X11rbError::from)?;

        Ok(())
    }

    fn send_client_message(&self, target: Xid, msg: &ClientMessage) -> Result<()> {
        let type_ = match Atom::from_str(&msg.dtype) {
            Ok(atom) => self.known(atom),
            Err(_) => self
                .conn
                .intern_atom(false, msg.dtype.as_bytes())
                .map_err(X11rbError::from)?
                .reply()
                .map_err(X11rbError::from)?
                .atom,
        };

        let (format, data) = match &msg.data {
            ClientMessageData::U8(bytes) => (8, (*bytes).into()),
            ClientMessageData::U32(words) => (32, (*words).into()),
        };

        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format,
            sequence: 0,
            window: msg.window.0,
            type_,
            data,
        };

        self.conn
            .send_event(false, target.0, EventMask::PROPERTY_CHANGE, event)
            .map_err(X11rbError::from)?;

        Ok(())
    }
}
