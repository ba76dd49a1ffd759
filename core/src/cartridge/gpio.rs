use bit::BitIndex;
use serde::{Deserialize, Serialize};

use super::rtc::Rtc;
use super::{GPIO_PORT_CONTROL, GPIO_PORT_DATA, GPIO_PORT_DIRECTION};

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub enum GpioDirection {
    /// GPIO to GBA
    In = 0,
    /// GBA to GPIO
    Out = 1,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub enum GpioPortControl {
    WriteOnly = 0,
    ReadWrite = 1,
}

pub trait GpioDevice: Sized {
    fn write(&mut self, gpio_state: &[GpioDirection; 4], data: u16);
    fn read(&self, gpio_state: &[GpioDirection; 4]) -> u16;
}

/// Tilt/gyro sensor on GPIO pin 2.
///
/// The host latches samples through [`set_sample`](Gyro::set_sample); the
/// game shifts them out high bit first, pin 0 restarting the readout and
/// pin 1 clocking it.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Gyro {
    value: u16,
    shift: u8,
    clock: bool,
}

impl Gyro {
    pub fn set_sample(&mut self, sample: i16) {
        self.value = sample as u16;
    }
}

impl GpioDevice for Gyro {
    fn write(&mut self, _gpio_state: &[GpioDirection; 4], data: u16) {
        if data.bit(0) {
            self.shift = 0;
        }
        let clock = data.bit(1);
        if clock && !self.clock && self.shift < 15 {
            self.shift += 1;
        }
        self.clock = clock;
    }

    fn read(&self, _gpio_state: &[GpioDirection; 4]) -> u16 {
        let bit = (self.value >> (15 - self.shift)) & 1;
        bit << 2
    }
}

/// Rumble motor on GPIO pin 3. The machine mirrors the pin state out to
/// the host rumble sink after each sweep.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Rumble {
    active: bool,
}

impl Rumble {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl GpioDevice for Rumble {
    fn write(&mut self, _gpio_state: &[GpioDirection; 4], data: u16) {
        self.active = data.bit(3);
    }

    fn read(&self, _gpio_state: &[GpioDirection; 4]) -> u16 {
        (self.active as u16) << 3
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Gpio {
    pub(crate) rtc: Option<Rtc>,
    pub(crate) gyro: Option<Gyro>,
    pub(crate) rumble: Option<Rumble>,
    direction: [GpioDirection; 4],
    control: GpioPortControl,
}

impl Gpio {
    pub fn new() -> Gpio {
        Gpio {
            rtc: None,
            gyro: None,
            rumble: None,
            direction: [GpioDirection::Out; 4],
            control: GpioPortControl::WriteOnly,
        }
    }

    pub fn init_rtc(&mut self) {
        info!("Emulating RTC!");
        self.rtc = Some(Rtc::new());
    }

    pub fn init_gyro(&mut self) {
        info!("Emulating gyro sensor!");
        self.gyro = Some(Gyro::default());
    }

    pub fn init_rumble(&mut self) {
        info!("Emulating rumble!");
        self.rumble = Some(Rumble::default());
    }

    pub(super) fn is_readable(&self) -> bool {
        self.control != GpioPortControl::WriteOnly
    }

    pub(super) fn read(&self, addr: u32) -> u16 {
        match addr {
            GPIO_PORT_DATA => {
                let mut value = 0;
                if let Some(rtc) = &self.rtc {
                    value |= rtc.read(&self.direction);
                }
                if let Some(gyro) = &self.gyro {
                    value |= gyro.read(&self.direction);
                }
                if let Some(rumble) = &self.rumble {
                    value |= rumble.read(&self.direction);
                }
                value
            }
            GPIO_PORT_DIRECTION => {
                let mut direction = 0u16;
                for i in 0..4 {
                    direction.set_bit(i, self.direction[i] == GpioDirection::Out);
                }
                direction
            }
            GPIO_PORT_CONTROL => self.control as u16,
            _ => unreachable!(),
        }
    }

    pub(super) fn write(&mut self, addr: u32, value: u16) {
        match addr {
            GPIO_PORT_DATA => {
                if let Some(rtc) = &mut self.rtc {
                    rtc.write(&self.direction, value);
                }
                if let Some(gyro) = &mut self.gyro {
                    gyro.write(&self.direction, value);
                }
                if let Some(rumble) = &mut self.rumble {
                    rumble.write(&self.direction, value);
                }
            }
            GPIO_PORT_DIRECTION => {
                for i in 0..4 {
                    if value.bit(i) {
                        self.direction[i] = GpioDirection::Out;
                    } else {
                        self.direction[i] = GpioDirection::In;
                    }
                }
            }
            GPIO_PORT_CONTROL => {
                self.control = if value != 0 {
                    GpioPortControl::ReadWrite
                } else {
                    GpioPortControl::WriteOnly
                };
            }
            _ => unreachable!(),
        }
    }
}
