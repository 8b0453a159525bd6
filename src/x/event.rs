//! Data types for working with X events
use crate::{Time, Xid};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Wrapper around the low level X event types that take part in the launch
/// feedback protocol.
///
/// Callers run their own event loop: each event read from the server should
/// be converted into an [XEvent] and handed to
/// [Display::process_event][crate::Display::process_event]. Events with no
/// counterpart here (map requests, key presses and so on) can never be part
/// of a launch sequence and do not need to be forwarded.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum XEvent {
    /// A message has been sent to a particular client
    ClientMessage(ClientMessage),
    /// A client property has changed in some way
    PropertyNotify(PropertyEvent),
    /// A client window has been destroyed
    Destroy(Xid),
}

impl std::fmt::Display for XEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XEvent::ClientMessage(_) => write!(f, "ClientMessage"),
            XEvent::PropertyNotify(_) => write!(f, "PropertyNotify"),
            XEvent::Destroy(_) => write!(f, "Destroy"),
        }
    }
}

/// The raw data contained in a [`ClientMessage`]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientMessageData {
    /// Slice of u8: a format 8 message
    U8([u8; 20]),
    /// Slice of u32: a format 32 message
    U32([u32; 5]),
}

impl ClientMessageData {
    /// The raw bytes of a format 8 message, if this is one
    pub fn bytes(&self) -> Option<&[u8; 20]> {
        match self {
            Self::U8(data) => Some(data),
            Self::U32(_) => None,
        }
    }

    /// The raw words of a format 32 message, if this is one
    pub fn words(&self) -> Option<&[u32; 5]> {
        match self {
            Self::U8(_) => None,
            Self::U32(data) => Some(data),
        }
    }
}

impl From<[u8; 20]> for ClientMessageData {
    fn from(data: [u8; 20]) -> Self {
        Self::U8(data)
    }
}

impl From<[u32; 5]> for ClientMessageData {
    fn from(data: [u32; 5]) -> Self {
        Self::U32(data)
    }
}

impl TryFrom<&[u8]> for ClientMessageData {
    type Error = std::array::TryFromSliceError;

    fn try_from(data: &[u8]) -> std::result::Result<Self, Self::Error> {
        Ok(Self::U8(<[u8; 20]>::try_from(data)?))
    }
}

impl TryFrom<&[u32]> for ClientMessageData {
    type Error = std::array::TryFromSliceError;

    fn try_from(data: &[u32]) -> std::result::Result<Self, Self::Error> {
        Ok(Self::U32(<[u32; 5]>::try_from(data)?))
    }
}

/// A client message that needs to be parsed and handled based on its type
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientMessage {
    /// The window field of the message, not the window it was sent to
    pub window: Xid,
    /// The name of the message type atom
    pub dtype: String,
    /// The raw data being sent in this message
    pub data: ClientMessageData,
}

impl ClientMessage {
    /// Build a new [ClientMessage] from its component parts
    pub fn new(window: Xid, dtype: impl Into<String>, data: impl Into<ClientMessageData>) -> Self {
        Self {
            window,
            dtype: dtype.into(),
            data: data.into(),
        }
    }
}

/// A property change on a known client
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyEvent {
    /// The ID of the window that had a property changed
    pub window: Xid,
    /// The name of the property that changed
    pub atom: String,
    /// The server timestamp of the change
    pub time: Time,
}
