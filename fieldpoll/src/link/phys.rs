use std::fmt::Write;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::decode::PhysDecodeLevel;

/// Byte stream underneath a framed transport
pub(crate) enum PhysLayer {
    Tcp(tokio::net::TcpStream),
    #[cfg(feature = "serial")]
    Serial {
        stream: tokio_serial::SerialStream,
        inter_frame_delay: tokio::time::Duration,
        last_activity: Option<tokio::time::Instant>,
    },
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PhysLayer::Tcp(_) => f.write_str("Tcp"),
            #[cfg(feature = "serial")]
            PhysLayer::Serial { .. } => f.write_str("Serial"),
            #[cfg(test)]
            PhysLayer::Mock(_) => f.write_str("Mock"),
        }
    }
}

impl PhysLayer {
    #[cfg(feature = "serial")]
    pub(crate) fn new_serial(stream: tokio_serial::SerialStream) -> Self {
        let inter_frame_delay = calculate_inter_frame_delay(&stream);
        PhysLayer::Serial {
            stream,
            inter_frame_delay,
            last_activity: None,
        }
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let length = match self {
            PhysLayer::Tcp(x) => x.read(buffer).await?,
            #[cfg(feature = "serial")]
            PhysLayer::Serial {
                stream,
                last_activity,
                ..
            } => {
                let length = stream.read(buffer).await?;
                *last_activity = Some(tokio::time::Instant::now());
                length
            }
            #[cfg(test)]
            PhysLayer::Mock(x) => x.read(buffer).await?,
        };

        if decode_level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(decode_level, x))
            }
        }

        Ok(length)
    }

    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if decode_level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(decode_level, data));
        }

        match self {
            PhysLayer::Tcp(x) => x.write_all(data).await,
            #[cfg(feature = "serial")]
            PhysLayer::Serial {
                stream,
                inter_frame_delay,
                last_activity,
            } => {
                // a frame may only start after 3.5 idle characters
                if let Some(last_activity) = last_activity {
                    tokio::time::sleep_until(*last_activity + *inter_frame_delay).await;
                }
                stream.write_all(data).await?;
                *last_activity = Some(tokio::time::Instant::now());
                Ok(())
            }
            #[cfg(test)]
            PhysLayer::Mock(x) => x.write_all(data).await,
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        let result = match self {
            PhysLayer::Tcp(x) => x.shutdown().await,
            #[cfg(feature = "serial")]
            PhysLayer::Serial { stream, .. } => stream.flush().await,
            #[cfg(test)]
            PhysLayer::Mock(x) => x.shutdown().await,
        };
        if let Err(err) = result {
            tracing::debug!("error closing {:?}: {}", self, err);
        }
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

#[cfg(feature = "serial")]
fn calculate_inter_frame_delay(serial: &tokio_serial::SerialStream) -> tokio::time::Duration {
    use tokio::time::Duration;
    use tokio_serial::SerialPort;

    // 11-bit characters: start, 8 data, parity or stop, stop
    const BITS_PER_CHAR: u64 = 11;
    // above 19200 baud the field-bus convention fixes the delay
    const MAX_BAUD_RATE: u32 = 19200;
    const MIN_DELAY: Duration = Duration::from_micros(1750);

    match serial.baud_rate() {
        Ok(baud_rate) if baud_rate > 0 && baud_rate <= MAX_BAUD_RATE => {
            let character_time = Duration::from_secs(BITS_PER_CHAR) / baud_rate;
            35 * character_time / 10
        }
        Ok(_) => MIN_DELAY,
        Err(_) => {
            tracing::warn!(
                "unable to determine the baud rate, defaulting to {} us",
                MIN_DELAY.as_micros()
            );
            MIN_DELAY
        }
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}
