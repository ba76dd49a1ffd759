//! Serial I/O stub.
//!
//! Link-cable transfers are not emulated; the registers are storage so
//! games polling them see their own writes back, and the unit never
//! schedules an event.

use serde::{Deserialize, Serialize};

use super::iodev::consts::*;

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SioController {
    siocnt: u16,
    rcnt: u16,
}

impl SioController {
    pub fn new() -> SioController {
        Default::default()
    }

    /// No transfer is ever in flight
    pub fn process_events(&mut self, _cycles: i32) -> i32 {
        i32::MAX
    }

    pub fn handle_read(&self, io_addr: u32) -> u16 {
        match io_addr {
            REG_SIOCNT => self.siocnt,
            REG_RCNT => self.rcnt,
            _ => 0,
        }
    }

    pub fn handle_write(&mut self, io_addr: u32, value: u16) {
        match io_addr {
            REG_SIOCNT => {
                if value & 0x80 != 0 {
                    debug!("SIO transfer requested, not implemented");
                }
                // the start bit never sticks, transfers "complete" instantly
                self.siocnt = value & !0x80;
            }
            REG_RCNT => self.rcnt = value,
            _ => {}
        }
    }
}
