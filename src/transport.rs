//! Frame transports: the serial RTU link and the trait that abstracts it.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::frame::MAX_ADU_LEN;

/// Delivers whole request ADUs and accepts whole response ADUs.
///
/// The server never sees partial frames: an implementation hands over a
/// frame only once its boundary has been detected, and discards bytes of a
/// frame that did not complete within the timeout.
#[async_trait]
pub trait FrameTransport: Send {
    /// Wait up to `timeout` for the next complete frame; `None` if no frame
    /// started in time.
    async fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Emit `frame` as a single contiguous burst.
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Parity of the serial character format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line parameters for the RTU link.
///
/// Data and stop bits are carried as plain counts; anything outside 7/8
/// data bits or 1/2 stop bits is refused when the port is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name, `/dev/ttyUSB0` or `COM3` style.
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    /// Data bits per character: 7 or 8.
    pub data_bits: u8,
    /// Stop bits per character: 1 or 2.
    pub stop_bits: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
        }
    }
}

impl SerialConfig {
    /// An 8N1 configuration on the given port.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// The 3.5 character-times of silence that delimit frames, with the
    /// 1.75 ms floor the protocol prescribes above 19200 baud.
    pub fn inter_frame_delay(&self) -> Duration {
        // one start bit, then data, parity and stop bits
        let parity_bit = u32::from(self.parity != Parity::None);
        let bits_per_char = 1 + u32::from(self.data_bits) + parity_bit + u32::from(self.stop_bits);

        let char_time_us = u64::from(bits_per_char) * 1_000_000 / u64::from(self.baud_rate);
        Duration::from_micros((char_time_us * 35 / 10).max(1750))
    }
}

/// RTU link over a serial port.
///
/// Frames are delimited by ≥3.5 character-times of line silence after the
/// last byte. The 1.5 character-time inter-character limit is not enforced:
/// the host UART exposes no idle detection, so a request with pathological
/// internal gaps is accepted as long as its CRC verifies. Responses go out
/// as one contiguous write.
#[derive(Debug)]
pub struct SerialTransport {
    stream: SerialStream,
    inter_frame_delay: Duration,
}

impl SerialTransport {
    /// Open the configured port, refusing line settings the RTU profile
    /// does not cover.
    pub fn open(config: &SerialConfig) -> io::Result<Self> {
        let data_bits = match config.data_bits {
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => return Err(bad_line_setting("data bits", other)),
        };
        let stop_bits = match config.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => return Err(bad_line_setting("stop bits", other)),
        };
        let parity = match config.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };

        let stream = tokio_serial::new(&config.port, config.baud_rate)
            .parity(parity)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{}: {}", config.port, e)))?;

        Ok(Self {
            stream,
            inter_frame_delay: config.inter_frame_delay(),
        })
    }
}

fn bad_line_setting(what: &str, value: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported {what} for RTU: {value}"),
    )
}

#[async_trait]
impl FrameTransport for SerialTransport {
    async fn recv_frame(&mut self, wait: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut scratch = [0u8; MAX_ADU_LEN];
        let mut adu = Vec::with_capacity(MAX_ADU_LEN);
        let deadline = Instant::now() + wait;

        loop {
            // before the first byte the caller's timeout governs; afterwards
            // 3.5 character-times of silence end the frame
            let window = if adu.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                deadline - now
            } else {
                self.inter_frame_delay
            };

            match timeout(window, self.stream.read(&mut scratch)).await {
                Ok(Ok(0)) => {
                    // port reported nothing; treat like silence
                    return Ok(if adu.is_empty() { None } else { Some(adu) });
                }
                Ok(Ok(n)) => {
                    adu.extend_from_slice(&scratch[..n]);
                    if adu.len() >= MAX_ADU_LEN {
                        adu.truncate(MAX_ADU_LEN);
                        return Ok(Some(adu));
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    if adu.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(adu));
                }
            }
        }
    }

    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await
    }
}
