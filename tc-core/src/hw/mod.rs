//! Hardware collaborators: hwmon fans and temperature probes

mod hwmon;
mod temperature;

pub use hwmon::{discover_fans, HwmonFan};
pub use temperature::{parse_celsius, parse_sensors_output, SystemTemperature};
