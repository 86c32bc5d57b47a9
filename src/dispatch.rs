//! Received frame dispatch to upper layer observers
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Vec;
use log::trace;

use crate::Time;
use crate::buffer::BufferHandle;
use crate::error::DispatchError;
use crate::tstp::Microframe;

/// Protocol identifier observers attach to
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Protocol(pub u16);

impl Protocol {
    /// TSTP protocol number
    pub const TSTP: Protocol = Protocol(0x8401);
}

/// Received frame or microframe offered to observers
#[derive(Copy, Clone, Debug)]
pub struct Notification<'n> {
    /// Pool buffer holding the frame
    pub buffer: BufferHandle,
    /// Message id, taken from the microframe that announced a data frame
    pub id: u16,
    /// SFD timestamp of the frame
    pub sfd: Time,
    /// Decoded microframe, `None` for data frames
    pub microframe: Option<Microframe>,
    /// Received frame contents
    pub frame: &'n [u8],
}

/// Observer of received frames.
///
/// Returning `true` from `update` for a data frame takes ownership of the
/// buffer, which must then be freed with `BufferPool::release`.
/// Microframe notifications never transfer ownership.
pub trait Observer {
    fn update(&self, protocol: Protocol, notification: &Notification) -> bool;
}

/// Observer list with up to `S` attachments
pub struct Dispatcher<'a, const S: usize> {
    observers: Vec<(Protocol, &'a dyn Observer), S>,
}

fn same_observer(a: &dyn Observer, b: &dyn Observer) -> bool {
    core::ptr::eq(a as *const _ as *const (), b as *const _ as *const ())
}

impl <'a, const S: usize> Dispatcher<'a, S> {
    pub const fn new() -> Self {
        Self { observers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Attach an observer for a protocol
    pub fn attach(&mut self, observer: &'a dyn Observer, protocol: Protocol) -> Result<(), DispatchError> {
        if self.observers.iter().any(|(p, o)| *p == protocol && same_observer(*o, observer)) {
            return Err(DispatchError::Duplicate);
        }

        self.observers.push((protocol, observer)).map_err(|_| DispatchError::Full)
    }

    /// Detach an observer, returning whether it was attached
    pub fn detach(&mut self, observer: &'a dyn Observer, protocol: Protocol) -> bool {
        let index = match self.observers.iter().position(|(p, o)| *p == protocol && same_observer(*o, observer)) {
            Some(i) => i,
            None => return false,
        };

        self.observers[index..].rotate_left(1);
        self.observers.pop();

        true
    }

    /// Offer a notification to observers of `protocol` in attach order,
    /// returning `true` once one consumes it.
    ///
    /// Microframe notifications are offered to every matching observer.
    pub fn notify(&self, protocol: Protocol, notification: &Notification) -> bool {
        let mut consumed = false;

        for (_, o) in self.observers.iter().filter(|(p, _)| *p == protocol) {
            if o.update(protocol, notification) && notification.microframe.is_none() {
                consumed = true;
                break;
            }
        }

        trace!("Notified {:?} (id: {:04x}, consumed: {})", protocol, notification.id, consumed);

        consumed
    }
}
