//! Instrument client over the Hyperion-style TCP command port.
//!
//! Wire format: the client sends `"<#Command> <args>\r\n"`; the instrument
//! answers with an 8-byte header followed by an ASCII message and binary
//! content:
//!
//! ```text
//! ┌────────┬──────┬─────────────┬──────────────┬─────────┬─────────┐
//! │ status │ type │ msg_len u16 │ cont_len u32 │ message │ content │
//! │   u8   │  u8  │     LE      │      LE      │  ASCII  │  bytes  │
//! └────────┴──────┴─────────────┴──────────────┴─────────┴─────────┘
//! ```
//!
//! A non-zero status is a command failure and the message explains it.

use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{DeviceClient, Spectrum};
use crate::config::DeviceConfig;
use crate::error::DeviceError;

/// Instrument command port.
pub const COMMAND_PORT: u16 = 51971;

const HEADER_LEN: usize = 8;

/// Parsed response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub status: u8,
    pub kind: u8,
    pub message_len: u16,
    pub content_len: u32,
}

/// One command reply.
#[derive(Debug, Default)]
pub struct Response {
    pub message: String,
    pub content: Vec<u8>,
}

pub struct HyperionClient {
    host: String,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    session: Option<TcpStream>,
}

impl HyperionClient {
    pub fn new(host: &str, config: &DeviceConfig) -> Self {
        Self::with_port(host, COMMAND_PORT, config)
    }

    pub fn with_port(host: &str, port: u16, config: &DeviceConfig) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            session: None,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(&self) -> Result<TcpStream, DeviceError> {
        let address = self.address();
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(DeviceError::Unreachable {
                address,
                reason: e.to_string(),
            }),
            Err(_) => Err(DeviceError::Unreachable {
                address,
                reason: format!("no answer within {}ms", self.connect_timeout.as_millis()),
            }),
        }
    }

    /// Run one command on the open session.
    ///
    /// Any transport failure drops the session; the next health check
    /// reconnects.
    pub async fn command(&mut self, command: &str, args: &str) -> Result<Response, DeviceError> {
        let stream = self.session.as_mut().ok_or(DeviceError::NotConnected)?;
        let result = tokio::time::timeout(self.command_timeout, exchange(stream, command, args))
            .await
            .unwrap_or_else(|_| Err(DeviceError::Timeout(command.to_string())));
        if matches!(result, Err(DeviceError::Io(_) | DeviceError::Timeout(_))) {
            self.session = None;
        }
        result
    }
}

async fn exchange(stream: &mut TcpStream, command: &str, args: &str) -> Result<Response, DeviceError> {
    let line = if args.is_empty() {
        format!("{command}\r\n")
    } else {
        format!("{command} {args}\r\n")
    };
    stream.write_all(line.as_bytes()).await?;

    let mut raw = [0u8; HEADER_LEN];
    stream.read_exact(&mut raw).await?;
    let header = parse_header(&raw);

    let mut message = vec![0u8; usize::from(header.message_len)];
    stream.read_exact(&mut message).await?;
    let mut content = vec![0u8; header.content_len as usize];
    stream.read_exact(&mut content).await?;

    let message = String::from_utf8_lossy(&message).into_owned();
    debug!(
        "Device: {command} -> status {} ({} content bytes)",
        header.status,
        content.len()
    );
    if header.status != 0 {
        return Err(DeviceError::Command {
            command: command.to_string(),
            message,
        });
    }
    Ok(Response { message, content })
}

pub fn parse_header(raw: &[u8; HEADER_LEN]) -> Header {
    Header {
        status: raw[0],
        kind: raw[1],
        message_len: u16::from_le_bytes([raw[2], raw[3]]),
        content_len: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
    }
}

fn malformed(command: &str, reason: impl Into<String>) -> DeviceError {
    DeviceError::Malformed {
        command: command.to_string(),
        reason: reason.into(),
    }
}

pub fn decode_f64(command: &str, content: &[u8]) -> Result<f64, DeviceError> {
    let bytes: [u8; 8] = content
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| malformed(command, format!("expected 8 bytes, got {}", content.len())))?;
    Ok(f64::from_le_bytes(bytes))
}

pub fn decode_u32(command: &str, content: &[u8]) -> Result<u32, DeviceError> {
    let bytes: [u8; 4] = content
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| malformed(command, format!("expected 4 bytes, got {}", content.len())))?;
    Ok(u32::from_le_bytes(bytes))
}

/// `#GetInstrumentUtcDateTime` content: six `u32` LE (Y M D h m s).
pub fn decode_utc(content: &[u8]) -> Result<NaiveDateTime, DeviceError> {
    const COMMAND: &str = "#GetInstrumentUtcDateTime";
    if content.len() < 24 {
        return Err(malformed(COMMAND, format!("expected 24 bytes, got {}", content.len())));
    }
    let mut fields = [0u32; 6];
    for (i, field) in fields.iter_mut().enumerate() {
        *field = decode_u32(COMMAND, &content[i * 4..])?;
    }
    let [year, month, day, hour, minute, second] = fields;
    let year = i32::try_from(year).map_err(|_| malformed(COMMAND, format!("year {year}")))?;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| malformed(COMMAND, format!("invalid date {fields:?}")))
}

/// Arguments for `#SetInstrumentUtcDateTime`.
pub fn clock_args(utc: NaiveDateTime) -> String {
    format!(
        "{} {} {} {} {} {}",
        utc.year(),
        utc.month(),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second()
    )
}

/// `#GetSpectrum` content: a `u16` LE header length (counted from the start
/// of the content), then `i16` LE samples in 0.01 dBm, channel major.
pub fn decode_spectrum(
    content: &[u8],
    start_nm: f64,
    delta_nm: f64,
    points: u32,
) -> Result<Spectrum, DeviceError> {
    const COMMAND: &str = "#GetSpectrum";
    if points == 0 {
        return Err(malformed(COMMAND, "wavelength axis has no points"));
    }
    if content.len() < 2 {
        return Err(malformed(COMMAND, "missing header length"));
    }
    let header_len = usize::from(u16::from_le_bytes([content[0], content[1]]));
    let samples = content
        .get(header_len..)
        .ok_or_else(|| malformed(COMMAND, format!("header length {header_len} exceeds content")))?;
    let points = points as usize;
    if samples.len() % (2 * points) != 0 {
        return Err(malformed(
            COMMAND,
            format!("{} sample bytes are not a multiple of {points} points", samples.len()),
        ));
    }

    let values: Vec<f64> = samples
        .chunks_exact(2)
        .map(|c| f64::from(i16::from_le_bytes([c[0], c[1]])) / 100.0)
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let wavelengths = (0..points).map(|i| start_nm + delta_nm * i as f64).collect();
    Ok(Spectrum {
        wavelengths,
        channels: values.chunks(points).map(<[f64]>::to_vec).collect(),
    })
}

impl DeviceClient for HyperionClient {
    async fn probe_control_channel(&mut self) -> Result<(), DeviceError> {
        self.open().await.map(drop)
    }

    async fn connect(&mut self) -> Result<(), DeviceError> {
        self.session = None;
        self.session = Some(self.open().await?);
        Ok(())
    }

    async fn health_probe(&mut self) -> Result<(), DeviceError> {
        self.command("#GetChannelDetectionSettingIds", "1").await.map(drop)
    }

    async fn fetch_measurement(&mut self) -> Result<Spectrum, DeviceError> {
        let start = self.command("#GetUserWavelengthStart", "").await?;
        let start = decode_f64("#GetUserWavelengthStart", &start.content)?;
        let delta = self.command("#GetUserWavelengthDelta", "").await?;
        let delta = decode_f64("#GetUserWavelengthDelta", &delta.content)?;
        let points = self.command("#GetUserWavelengthNumberOfPoints", "").await?;
        let points = decode_u32("#GetUserWavelengthNumberOfPoints", &points.content)?;
        let spectrum = self.command("#GetSpectrum", "").await?;
        decode_spectrum(&spectrum.content, start, delta, points)
    }

    async fn instrument_time(&mut self) -> Result<NaiveDateTime, DeviceError> {
        let response = self.command("#GetInstrumentUtcDateTime", "").await?;
        decode_utc(&response.content)
    }

    async fn set_clock(&mut self, utc: NaiveDateTime) -> Result<(), DeviceError> {
        self.command("#SetInstrumentUtcDateTime", &clock_args(utc))
            .await
            .map(drop)
    }

    async fn reboot(&mut self) -> Result<(), DeviceError> {
        let result = self.command("#Reboot", "").await.map(drop);
        self.session = None;
        result
    }

    async fn board_temperature(&mut self) -> Result<f64, DeviceError> {
        let response = self.command("#GetBoardTemperature", "").await?;
        decode_f64("#GetBoardTemperature", &response.content)
    }
}
