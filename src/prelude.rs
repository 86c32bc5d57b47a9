//! TSTP MAC crate prelude
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub use crate::{Radio, Time};

pub use crate::mac::{Mac, MacState, RxMode, Config as MacConfig, Statistics as MacStats, Router};

pub use crate::error::{CoreError, DecodeError, DispatchError, UnitError};
pub use crate::timer::{Timer as MacTimer};
pub use crate::phy::{Phy, RadioPhy};

pub use crate::buffer::{BufferPool, Buffer, BufferHandle, BufferFlags};
pub use crate::dispatch::{Observer, Notification, Protocol};
pub use crate::units::Units;

pub use crate::tstp::{Header, Microframe, Message, Interest, Data, MessageType, Coordinates, Region};
