//! S-3511 real time clock, bit-banged over GPIO pins 0 (SCK), 1 (SIO)
//! and 2 (CS).

use bit::BitIndex;
use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use super::gpio::{GpioDevice, GpioDirection};

#[inline]
fn bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
enum RtcState {
    Idle,
    Command,
    Reading,
    Writing,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Rtc {
    state: RtcState,
    sck: bool,
    cs: bool,

    shift: u8,
    bits: u8,
    command: u8,

    /// Response payload, sent LSB first byte by byte
    payload: Vec<u8>,
    payload_index: usize,

    control: u8,
}

impl Rtc {
    pub fn new() -> Rtc {
        Rtc {
            state: RtcState::Idle,
            sck: false,
            cs: false,
            shift: 0,
            bits: 0,
            command: 0,
            payload: Vec::new(),
            payload_index: 0,
            control: 0x40,
        }
    }

    fn datetime_payload() -> Vec<u8> {
        let now = Local::now();
        vec![
            bcd((now.year() % 100) as u8),
            bcd(now.month() as u8),
            bcd(now.day() as u8),
            bcd(now.weekday().num_days_from_sunday() as u8),
            bcd((now.hour() % 24) as u8),
            bcd(now.minute() as u8),
            bcd(now.second() as u8),
        ]
    }

    fn start_command(&mut self, command: u8) {
        // command bytes are 0110 cccR
        let code = (command >> 1) & 0x7;
        let is_read = command & 1 != 0;
        trace!("RTC command {:x} read={}", code, is_read);
        match (code, is_read) {
            (2, true) => {
                self.payload = Rtc::datetime_payload();
                self.state = RtcState::Reading;
            }
            (6, true) => {
                self.payload = Rtc::datetime_payload().split_off(4);
                self.state = RtcState::Reading;
            }
            (4, true) => {
                self.payload = vec![self.control];
                self.state = RtcState::Reading;
            }
            (4, false) => {
                self.state = RtcState::Writing;
            }
            (0, false) => {
                // reset
                self.control = 0;
                self.state = RtcState::Idle;
            }
            _ => {
                debug!("unhandled RTC command {:x}", command);
                self.state = RtcState::Idle;
            }
        }
        self.payload_index = 0;
        self.shift = 0;
        self.bits = 0;
    }

    #[inline]
    fn out_bit(&self) -> u16 {
        if self.state != RtcState::Reading || self.payload_index >= self.payload.len() {
            return 0;
        }
        let byte = self.payload[self.payload_index];
        (((byte >> self.bits) & 1) as u16) << 1
    }
}

impl GpioDevice for Rtc {
    fn write(&mut self, gpio_state: &[GpioDirection; 4], data: u16) {
        let sck = data.bit(0);
        let sio = data.bit(1);
        let cs = data.bit(2);

        if !cs {
            // chip deselected, abort whatever was in flight
            self.state = RtcState::Idle;
            self.shift = 0;
            self.bits = 0;
        } else if !self.cs {
            self.state = RtcState::Command;
            self.shift = 0;
            self.bits = 0;
        } else if sck && !self.sck {
            // rising clock edge
            match self.state {
                RtcState::Command => {
                    self.shift |= (sio as u8) << self.bits;
                    self.bits += 1;
                    if self.bits == 8 {
                        // the command byte arrives MSB first when prefixed
                        // with the 0110 signature
                        let command = if self.shift & 0xf0 == 0x60 {
                            self.shift.reverse_bits()
                        } else {
                            self.shift
                        };
                        self.start_command(command);
                    }
                }
                RtcState::Reading => {
                    if gpio_state[1] == GpioDirection::In {
                        self.bits += 1;
                        if self.bits == 8 {
                            self.bits = 0;
                            self.payload_index += 1;
                            if self.payload_index >= self.payload.len() {
                                self.state = RtcState::Idle;
                            }
                        }
                    }
                }
                RtcState::Writing => {
                    self.shift |= (sio as u8) << self.bits;
                    self.bits += 1;
                    if self.bits == 8 {
                        self.control = self.shift;
                        self.state = RtcState::Idle;
                    }
                }
                RtcState::Idle => {}
            }
        }

        self.sck = sck;
        self.cs = cs;
    }

    fn read(&self, _gpio_state: &[GpioDirection; 4]) -> u16 {
        self.out_bit() | (self.sck as u16) | (self.cs as u16) << 2
    }
}
