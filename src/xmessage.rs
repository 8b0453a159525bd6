//! Broadcasting and reassembling text payloads carried over client messages
//!
//! Some launchers predate the property based protocol and announce launches
//! as "xmessages": a NUL terminated UTF-8 payload chopped into the 20 byte
//! `data.b` field of consecutive format 8 client messages, all sent to the
//! root window with a well known type atom. This module implements both
//! directions: [broadcast] emits such a train from a throwaway carrier
//! window, and the receive side reassembles fragments per (type, window)
//! pair and hands completed payloads to registered handlers.
use crate::{
    x::{broadcast_to_roots, ClientMessage, ClientMessageData, XConn, XEvent},
    Display, Result, Xid,
};
use std::{cell::RefCell, rc::Rc};
use tracing::warn;

// Bound on the bytes buffered for a single partially assembled message, so
// that a sender which never terminates its payload cannot consume unbounded
// memory.
const MAX_MESSAGE_LEN: usize = 4096;

/// A handle identifying a registered xmessage handler, for deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

type Callback<X> = Rc<RefCell<dyn FnMut(&Display<X>, &str, &str)>>;

struct Handler<X: XConn> {
    message_type: String,
    func: Callback<X>,
    token: HandlerToken,
}

struct Partial {
    message_type: String,
    window: Xid,
    buf: Vec<u8>,
    // set once the buffer has blown the length cap: the remainder of the
    // train is swallowed without buffering, up to and including its NUL
    discarding: bool,
}

pub(crate) struct Router<X: XConn> {
    handlers: Vec<Handler<X>>,
    pending: Vec<Partial>,
    next_token: u64,
}

impl<X: XConn> Router<X> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Vec::new(),
            pending: Vec::new(),
            next_token: 0,
        }
    }

    fn handles_type(&self, message_type: &str) -> bool {
        self.handlers.iter().any(|h| h.message_type == message_type)
    }

    // Fold one fragment into the pending buffers, returning a completed
    // payload (without its terminating NUL) if this fragment finished one.
    fn ingest(&mut self, msg: &ClientMessage) -> Option<Vec<u8>> {
        let bytes = match &msg.data {
            ClientMessageData::U8(bytes) => bytes,
            ClientMessageData::U32(_) => return None,
        };

        let index = self
            .pending
            .iter()
            .position(|p| p.window == msg.window && p.message_type == msg.dtype)
            .unwrap_or_else(|| {
                self.pending.push(Partial {
                    message_type: msg.dtype.clone(),
                    window: msg.window,
                    buf: Vec::new(),
                    discarding: false,
                });
                self.pending.len() - 1
            });

        let nul = bytes.iter().position(|&b| b == 0);

        if self.pending[index].discarding {
            if nul.is_some() {
                self.pending.remove(index);
            }
            return None;
        }

        match nul {
            Some(n) => {
                let mut partial = self.pending.remove(index);
                partial.buf.extend_from_slice(&bytes[..n]);
                if partial.buf.len() + 1 > MAX_MESSAGE_LEN {
                    warn!(
                        window = %partial.window,
                        message_type = %partial.message_type,
                        "dropping oversized xmessage"
                    );
                    None
                } else {
                    Some(partial.buf)
                }
            }
            None => {
                let partial = &mut self.pending[index];
                partial.buf.extend_from_slice(bytes);
                if partial.buf.len() + 1 > MAX_MESSAGE_LEN {
                    warn!(
                        window = %partial.window,
                        message_type = %partial.message_type,
                        "xmessage exceeded the length cap, discarding"
                    );
                    partial.buf = Vec::new();
                    partial.discarding = true;
                }
                None
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Register `func` to receive completed payloads of the given message type
/// on this display.
///
/// The returned token deregisters the handler via [remove_handler]. Handlers
/// may register and deregister handlers from within a callback; the change
/// takes effect for the next completed payload.
pub fn add_handler<X, F>(display: &Display<X>, message_type: &str, func: F) -> HandlerToken
where
    X: XConn,
    F: FnMut(&Display<X>, &str, &str) + 'static,
{
    let mut router = display.state().xmessages.borrow_mut();
    let token = HandlerToken(router.next_token);
    router.next_token += 1;
    router.handlers.push(Handler {
        message_type: message_type.to_string(),
        func: Rc::new(RefCell::new(func)),
        token,
    });

    token
}

/// Deregister a handler previously registered with [add_handler].
pub fn remove_handler<X: XConn>(display: &Display<X>, token: HandlerToken) {
    display
        .state()
        .xmessages
        .borrow_mut()
        .handlers
        .retain(|h| h.token != token);
}

/// Broadcast a payload to every screen of the display as a train of format 8
/// client messages of the given type.
///
/// A throwaway carrier window is created to give the train an identity for
/// reassembly on the receiving side and destroyed once the train has been
/// sent. Payloads containing NUL cannot be carried and are dropped with a
/// diagnostic.
pub fn broadcast<X: XConn>(display: &Display<X>, message_type: &str, message: &str) -> Result<()> {
    if message.contains('\0') {
        warn!(message_type, "attempted to send an xmessage containing NUL");
        return Ok(());
    }

    let conn = display.conn();
    let window = conn.create_carrier_window()?;

    let mut bytes = message.as_bytes().to_vec();
    bytes.push(0);

    for chunk in bytes.chunks(20) {
        let mut data = [0u8; 20];
        data[..chunk.len()].copy_from_slice(chunk);
        let msg = ClientMessage::new(window, message_type, ClientMessageData::U8(data));
        broadcast_to_roots(conn, &msg)?;
    }

    conn.destroy_window(window)?;
    conn.flush();

    Ok(())
}

pub(crate) fn process_event<X: XConn>(display: &Display<X>, event: &XEvent) -> bool {
    let msg = match event {
        XEvent::ClientMessage(msg) => msg,
        _ => return false,
    };

    let completed = {
        let mut router = display.state().xmessages.borrow_mut();
        if !router.handles_type(&msg.dtype) {
            return false;
        }
        router.ingest(msg)
    };

    let payload = match completed {
        Some(payload) => payload,
        None => return true,
    };

    let text = match String::from_utf8(payload) {
        Ok(text) => text,
        Err(_) => {
            warn!(message_type = %msg.dtype, "ignoring non UTF-8 xmessage");
            return true;
        }
    };

    // Snapshot the matching handlers so that callbacks are free to mutate
    // the handler list while the payload is being dispatched.
    let targets: Vec<(String, Callback<X>)> = display
        .state()
        .xmessages
        .borrow()
        .handlers
        .iter()
        .filter(|h| h.message_type == msg.dtype)
        .map(|h| (h.message_type.clone(), Rc::clone(&h.func)))
        .collect();

    for (message_type, func) in targets {
        match func.try_borrow_mut() {
            Ok(mut func) => (&mut *func)(display, &message_type, &text),
            Err(_) => warn!(%message_type, "skipping reentrant xmessage dispatch"),
        }
    }

    true
}
