extern crate serde;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate enum_primitive_derive;

#[macro_use]
extern crate bitfield;
#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate log;

#[macro_use]
extern crate hex_literal;

#[macro_use]
extern crate smart_default;

use std::error::Error;
use std::fmt;

pub mod arm7tdmi;
mod bios;
pub mod bus;
pub mod cartridge;
pub mod debugger;
pub mod dma;
pub mod gba;
pub mod interrupt;
pub mod iodev;
pub mod logging;
pub(crate) mod overrides;
pub mod sio;
pub mod sound;
pub mod sysbus;
pub mod timer;
pub mod video;

pub use bus::*;
pub use gba::GameBoyAdvance;
pub use interrupt::Interrupt;
pub use interrupt::SharedInterruptFlags;
pub use sysbus::SysBus;

/// Host-supplied keypad state, polled once per frame by the embedding
/// application. `0` bits are pressed keys (GBA active-low convention).
pub trait InputInterface {
    fn poll(&mut self) -> u16 {
        iodev::consts::KEYINPUT_ALL_RELEASED
    }
}

/// Host-supplied tilt/gyroscope sensor, sampled by the cartridge GPIO unit.
pub trait RotationSource {
    fn sample_x(&mut self) -> i16 {
        0
    }
    fn sample_y(&mut self) -> i16 {
        0
    }
}

/// Host-side rumble sink, driven by the cartridge GPIO unit.
pub trait RumbleInterface {
    #[allow(unused_variables)]
    fn set_rumble(&mut self, active: bool) {}
}

pub type StereoSample<T> = [T; 2];

#[derive(Debug)]
pub enum GBAError {
    IO(::std::io::Error),
    CartridgeLoadError(String),
}

impl fmt::Display for GBAError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {:?}", self)
    }
}

impl Error for GBAError {
    fn description(&self) -> &str {
        "emulator error"
    }
}

pub type GBAResult<T> = Result<T, GBAError>;

impl From<::std::io::Error> for GBAError {
    fn from(err: ::std::io::Error) -> GBAError {
        GBAError::IO(err)
    }
}

impl From<zip::result::ZipError> for GBAError {
    fn from(_err: zip::result::ZipError) -> GBAError {
        GBAError::IO(::std::io::Error::from(::std::io::ErrorKind::InvalidInput))
    }
}

pub mod prelude {
    pub use super::arm7tdmi::Arm7tdmi;
    pub use super::cartridge::{Cartridge, GamepakBuilder, Patch};
    pub use super::debugger::{DebuggerHook, EntryReason};
    pub use super::logging::LogLevels;
    pub use super::Bus;
    pub use super::{GBAError, GBAResult, GameBoyAdvance};
    pub use super::{InputInterface, RotationSource, RumbleInterface, StereoSample};
    pub use rustagb_utils::{read_bin_file, write_bin_file};
}
