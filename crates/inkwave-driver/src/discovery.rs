//! Sysfs device discovery
//!
//! Locates the EPD framebuffer node and the panel temperature sensor by
//! scanning `/sys/class`. Both lookups match on the device `name` attribute
//! the way the kernel drivers register themselves.

use std::fs;
use std::path::{Path, PathBuf};

const FRAMEBUFFER_NAME: &str = "mxs-lcdif";
const SENSOR_NAME: &str = "sy7636a_temperature";

/// Finds the EPD framebuffer device node.
///
/// Scans `/sys/class/graphics` for the entry named after the LCD interface
/// driver and resolves `/dev/fb<minor>` from its `dev` attribute.
pub fn discover_framebuffer() -> Option<PathBuf> {
    discover_framebuffer_in(Path::new("/sys/class/graphics"), Path::new("/dev"))
}

/// Finds the panel temperature sensor file.
///
/// Scans `/sys/class/hwmon` for the power-management chip's temperature
/// interface and yields its `temp0` attribute.
pub fn discover_temperature_sensor() -> Option<PathBuf> {
    discover_sensor_in(Path::new("/sys/class/hwmon"))
}

fn discover_framebuffer_in(class_root: &Path, dev_root: &Path) -> Option<PathBuf> {
    for entry in matching_entries(class_root, FRAMEBUFFER_NAME) {
        let Ok(dev) = fs::read_to_string(entry.join("dev")) else {
            continue;
        };

        // The dev attribute holds "major:minor"
        let Some(minor) = dev.trim().split(':').nth(1) else {
            continue;
        };

        let node = dev_root.join(format!("fb{minor}"));
        if node.exists() {
            return Some(node);
        }
    }

    None
}

fn discover_sensor_in(class_root: &Path) -> Option<PathBuf> {
    for entry in matching_entries(class_root, SENSOR_NAME) {
        let sensor = entry.join("temp0");
        if sensor.exists() {
            return Some(sensor);
        }
    }

    None
}

/// Class entries whose `name` attribute matches, in directory order.
fn matching_entries(class_root: &Path, name: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(class_root) else {
        return Vec::new();
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            fs::read_to_string(path.join("name"))
                .map(|contents| contents.trim() == name)
                .unwrap_or(false)
        })
        .collect()
}
