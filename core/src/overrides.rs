use std::collections::HashMap;
use std::convert::TryFrom;

use yaml_rust::YamlLoader;

use super::cartridge::BackupType;

bitflags! {
    /// Devices wired to the cartridge GPIO port
    pub struct GpioFeatures: u32 {
        const RTC = 0b0001;
        const GYRO = 0b0010;
        const RUMBLE = 0b0100;
        const LIGHT_SENSOR = 0b1000;
    }
}

#[derive(Debug)]
pub struct GameOverride {
    save_type: Option<BackupType>,
    gpio: GpioFeatures,
}

impl GameOverride {
    pub fn save_type(&self) -> Option<BackupType> {
        self.save_type
    }
    pub fn gpio(&self) -> GpioFeatures {
        self.gpio
    }
}

lazy_static! {
    static ref GAME_OVERRIDES: HashMap<String, GameOverride> = {
        let mut m = HashMap::new();

        let docs = YamlLoader::load_from_str(include_str!("../overrides.yaml"))
            .expect("failed to load overrides file");

        let doc = &docs[0];
        let games = doc.as_vec().unwrap();

        for game in games {
            let game_code = String::from(game["code"].as_str().unwrap());
            let save_type = if let Some(save_type) = game["save_type"].as_str() {
                match BackupType::try_from(save_type) {
                    Ok(x) => Some(x),
                    _ => panic!("{}: invalid save type {:#}", game_code, save_type),
                }
            } else {
                None
            };

            let mut gpio = GpioFeatures::empty();
            if let Some(devices) = game["gpio"].as_vec() {
                for device in devices {
                    gpio |= match device.as_str() {
                        Some("rtc") => GpioFeatures::RTC,
                        Some("gyro") => GpioFeatures::GYRO,
                        Some("rumble") => GpioFeatures::RUMBLE,
                        Some("light_sensor") => GpioFeatures::LIGHT_SENSOR,
                        _ => panic!("{}: invalid gpio device {:?}", game_code, device),
                    };
                }
            }

            let game_override = GameOverride { save_type, gpio };
            m.insert(game_code, game_override);
        }

        m
    };
}

pub fn get_game_overrides(game_code: &str) -> Option<&'static GameOverride> {
    GAME_OVERRIDES.get(game_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emerald_override() {
        let o = get_game_overrides("BPEE").unwrap();
        assert_eq!(o.save_type(), Some(BackupType::Flash1M));
        assert_eq!(o.gpio(), GpioFeatures::RTC);
    }

    #[test]
    fn test_wario_ware_twisted_override() {
        let o = get_game_overrides("RWZE").unwrap();
        assert_eq!(o.save_type(), Some(BackupType::Sram));
        assert!(o.gpio().contains(GpioFeatures::RUMBLE | GpioFeatures::GYRO));
        assert!(!o.gpio().contains(GpioFeatures::RTC));
    }

    #[test]
    fn test_light_sensor_is_metadata_only() {
        let o = get_game_overrides("U3IE").unwrap();
        assert!(o.gpio().contains(GpioFeatures::LIGHT_SENSOR));
    }

    #[test]
    fn test_unknown_code_has_no_override() {
        assert!(get_game_overrides("ZZZZ").is_none());
    }
}
