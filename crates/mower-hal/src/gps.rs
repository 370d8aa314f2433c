//! NMEA GPS receiver driver.
//!
//! Consumes the serial byte stream, splits it into sentences, validates the
//! `*hh` checksum, and decodes the most recent GGA sentence (fix quality,
//! position, satellite count, HDOP).  Talker id is ignored so GPS-only
//! (`GP`) and multi-constellation (`GN`) receivers both work.

use mower_types::{ErrorCode, GpsSection, MowerError};

use crate::sensor::Sensor;
use crate::serial::SerialPort;

pub struct NmeaGps {
    port: Box<dyn SerialPort>,
    line: String,
    last_fix: GpsSection,
}

impl NmeaGps {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            line: String::new(),
            last_fix: GpsSection::default(),
        }
    }

    /// Validate `*hh` checksum and return the payload between `$` and `*`.
    fn payload(sentence: &str) -> Option<&str> {
        let body = sentence.strip_prefix('$')?;
        let (payload, checksum) = body.rsplit_once('*')?;
        let declared = u8::from_str_radix(checksum.trim_end(), 16).ok()?;
        let computed = payload.bytes().fold(0u8, |acc, b| acc ^ b);
        (computed == declared).then_some(payload)
    }

    /// Decode `ddmm.mmmm` (or `dddmm.mmmm`) plus hemisphere into degrees.
    fn coordinate(raw: &str, hemisphere: &str) -> Option<f64> {
        let dot = raw.find('.').unwrap_or(raw.len());
        // At least one degree digit ahead of the two minute digits.
        if dot < 3 || raw.len() < 4 {
            return None;
        }
        let split = dot - 2;
        let degrees: f64 = raw[..split].parse().ok()?;
        let minutes: f64 = raw[split..].parse().ok()?;
        let value = degrees + minutes / 60.0;
        match hemisphere {
            "N" | "E" => Some(value),
            "S" | "W" => Some(-value),
            _ => None,
        }
    }

    fn parse_gga(payload: &str) -> Option<GpsSection> {
        let fields: Vec<&str> = payload.split(',').collect();
        if fields.len() < 9 || !fields[0].ends_with("GGA") {
            return None;
        }
        let quality: u8 = fields[6].parse().unwrap_or(0);
        let satellites: u32 = fields[7].parse().unwrap_or(0);
        let hdop: f64 = fields[8].parse().unwrap_or(99.9);
        if quality == 0 {
            return Some(GpsSection {
                satellites,
                hdop,
                ..GpsSection::default()
            });
        }
        let latitude = Self::coordinate(fields[2], fields[3])?;
        let longitude = Self::coordinate(fields[4], fields[5])?;
        Some(GpsSection {
            latitude,
            longitude,
            fix: true,
            satellites,
            hdop,
        })
    }

    /// Feed buffered bytes through the line splitter, returning the last
    /// complete GGA fix found, if any.
    fn drain_sentences(&mut self, bytes: &[u8]) -> Option<GpsSection> {
        let mut latest = None;
        for &b in bytes {
            match b {
                b'\n' => {
                    let sentence = std::mem::take(&mut self.line);
                    if let Some(fix) = Self::payload(sentence.trim_end()).and_then(Self::parse_gga)
                    {
                        latest = Some(fix);
                    }
                }
                b'\r' => {}
                _ => {
                    self.line.push(b as char);
                    // A sentence never legitimately exceeds 82 characters.
                    if self.line.len() > 120 {
                        self.line.clear();
                    }
                }
            }
        }
        latest
    }
}

impl Sensor for NmeaGps {
    type Reading = GpsSection;

    fn name(&self) -> &str {
        "gps"
    }

    fn initialize(&mut self) -> Result<(), MowerError> {
        self.port.clear_input()?;
        self.line.clear();
        Ok(())
    }

    fn read(&mut self) -> Result<GpsSection, MowerError> {
        let mut buf = [0u8; 512];
        let n = self.port.read(&mut buf)?;
        if let Some(fix) = self.drain_sentences(&buf[..n]) {
            self.last_fix = fix;
            return Ok(fix);
        }
        // GGA arrives at 1 Hz while polls run faster; between sentences the
        // previous fix is still current.
        if self.last_fix.fix {
            return Ok(self.last_fix);
        }
        Err(MowerError::navigation(
            ErrorCode::GpsSignalLost,
            "no gga sentence decoded".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ReplayPort {
        chunks: VecDeque<Vec<u8>>,
    }

    impl SerialPort for ReplayPort {
        fn write(&mut self, _bytes: &[u8]) -> Result<(), MowerError> {
            Ok(())
        }
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, MowerError> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
        fn clear_input(&mut self) -> Result<(), MowerError> {
            Ok(())
        }
    }

    fn gps_with(lines: &[&str]) -> NmeaGps {
        let chunks = lines
            .iter()
            .map(|l| format!("{l}\r\n").into_bytes())
            .collect();
        NmeaGps::new(Box::new(ReplayPort { chunks }))
    }

    fn with_checksum(payload: &str) -> String {
        let cs = payload.bytes().fold(0u8, |a, b| a ^ b);
        format!("${payload}*{cs:02X}")
    }

    #[test]
    fn decodes_a_gga_fix() {
        let sentence =
            with_checksum("GNGGA,120044.00,5109.0262,N,11401.8407,W,1,09,1.2,1065.0,M,-16.3,M,,");
        let mut gps = gps_with(&[&sentence]);
        let fix = gps.read().unwrap();
        assert!(fix.fix);
        assert!((fix.latitude - 51.150_436).abs() < 1e-4);
        assert!((fix.longitude + 114.030_678).abs() < 1e-4);
        assert_eq!(fix.satellites, 9);
        assert!((fix.hdop - 1.2).abs() < 1e-9);
    }

    #[test]
    fn quality_zero_reports_no_fix() {
        let sentence = with_checksum("GPGGA,120044.00,,,,,0,03,9.9,,M,,M,,");
        let mut gps = gps_with(&[&sentence]);
        let fix = gps.read().unwrap();
        assert!(!fix.fix);
        assert_eq!(fix.satellites, 3);
    }

    #[test]
    fn bad_checksum_is_dropped() {
        let mut gps = gps_with(&["$GNGGA,120044.00,5109.0262,N,11401.8407,W,1,09,1.2,,M,,M,,*00"]);
        assert!(gps.read().is_err());
    }

    #[test]
    fn non_gga_sentences_are_ignored() {
        let rmc = with_checksum("GNRMC,120044.00,A,5109.0262,N,11401.8407,W,0.1,0.0,010120,,,A");
        let mut gps = gps_with(&[&rmc]);
        assert!(gps.read().is_err());
    }

    #[test]
    fn previous_fix_survives_quiet_polls() {
        let sentence =
            with_checksum("GNGGA,120044.00,5109.0262,N,11401.8407,W,1,09,1.2,1065.0,M,-16.3,M,,");
        let mut gps = gps_with(&[&sentence]);
        let first = gps.read().unwrap();
        // Next poll reads nothing from the port.
        let second = gps.read().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn southern_western_hemispheres_are_negative() {
        let sentence = with_checksum("GPGGA,000000.00,3354.9280,S,15112.2640,E,1,07,0.9,,M,,M,,");
        let mut gps = gps_with(&[&sentence]);
        let fix = gps.read().unwrap();
        assert!(fix.latitude < 0.0);
        assert!(fix.longitude > 0.0);
    }
}
