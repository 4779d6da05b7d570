//! Panel temperature source
//!
//! Waveform timing depends on panel temperature, which the hardware exposes
//! as an integer °C in a sysfs file. Reads are cached for a configurable
//! interval; the sensor is polled from the vsync thread before each batch.

use crate::error::DisplayError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, Instant};

enum Source {
    Sysfs(File),
    Fixed,
}

/// Cached reader of the panel temperature sensor.
pub struct TemperatureSensor {
    source: Source,
    read_interval: Duration,
    celsius: i32,
    last_read: Option<Instant>,
}

impl TemperatureSensor {
    /// How long a reading stays fresh by default.
    pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_secs(30);

    /// Opens a sysfs temperature file.
    ///
    /// The first [`refresh`](Self::refresh) performs the initial read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DisplayError> {
        let file = File::open(path).map_err(|e| DisplayError::io("open temperature sensor", e))?;

        Ok(Self {
            source: Source::Sysfs(file),
            read_interval: Self::DEFAULT_READ_INTERVAL,
            celsius: 0,
            last_read: None,
        })
    }

    /// Sensor that always reports `celsius`, for tests and mock panels.
    pub fn fixed(celsius: i32) -> Self {
        Self {
            source: Source::Fixed,
            read_interval: Self::DEFAULT_READ_INTERVAL,
            celsius,
            last_read: None,
        }
    }

    /// Overrides the caching interval.
    pub fn with_read_interval(mut self, interval: Duration) -> Self {
        self.read_interval = interval;
        self
    }

    /// Latest reading in °C.
    pub fn celsius(&self) -> i32 {
        self.celsius
    }

    /// Re-reads the sensor unless the cached value is still fresh.
    pub fn refresh(&mut self) -> Result<(), DisplayError> {
        let Source::Sysfs(file) = &mut self.source else {
            return Ok(());
        };

        if let Some(last) = self.last_read {
            if last.elapsed() <= self.read_interval {
                return Ok(());
            }
        }

        file.seek(SeekFrom::Start(0))
            .map_err(|e| DisplayError::io("seek temperature sensor", e))?;

        let mut buffer = [0u8; 12];
        let len = file
            .read(&mut buffer)
            .map_err(|e| DisplayError::io("read temperature sensor", e))?;

        let text = std::str::from_utf8(&buffer[..len])
            .map_err(|e| DisplayError::io("decode temperature", invalid_data(e)))?;
        self.celsius = text
            .trim()
            .parse()
            .map_err(|e| DisplayError::io("parse temperature", invalid_data(e)))?;
        self.last_read = Some(Instant::now());

        Ok(())
    }
}

fn invalid_data(err: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sensor_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_integer_celsius() {
        let file = sensor_file("24\n");
        let mut sensor = TemperatureSensor::open(file.path()).unwrap();

        sensor.refresh().unwrap();
        assert_eq!(sensor.celsius(), 24);
    }

    #[test]
    fn reads_negative_values() {
        let file = sensor_file("-7");
        let mut sensor = TemperatureSensor::open(file.path()).unwrap();

        sensor.refresh().unwrap();
        assert_eq!(sensor.celsius(), -7);
    }

    #[test]
    fn caches_within_interval() {
        let file = sensor_file("24\n");
        let mut sensor = TemperatureSensor::open(file.path()).unwrap();
        sensor.refresh().unwrap();

        std::fs::write(file.path(), "31\n").unwrap();

        sensor.refresh().unwrap();
        assert_eq!(sensor.celsius(), 24, "cached value expected inside interval");
    }

    #[test]
    fn zero_interval_rereads() {
        let file = sensor_file("24\n");
        let mut sensor = TemperatureSensor::open(file.path())
            .unwrap()
            .with_read_interval(Duration::ZERO);
        sensor.refresh().unwrap();

        std::fs::write(file.path(), "31\n").unwrap();
        std::thread::sleep(Duration::from_millis(5));

        sensor.refresh().unwrap();
        assert_eq!(sensor.celsius(), 31);
    }

    #[test]
    fn garbage_is_an_error() {
        let file = sensor_file("not a number");
        let mut sensor = TemperatureSensor::open(file.path()).unwrap();

        assert!(matches!(sensor.refresh(), Err(DisplayError::Io { .. })));
    }

    #[test]
    fn fixed_sensor_never_reads() {
        let mut sensor = TemperatureSensor::fixed(19);
        sensor.refresh().unwrap();
        assert_eq!(sensor.celsius(), 19);
    }
}
