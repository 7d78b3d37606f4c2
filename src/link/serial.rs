// Serial Link Implementation
// Line-oriented access to the bridge over a USB serial device

use crate::link::{Link, LinkConfig, LinkError, LinkState, LinkStats};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Serial port connection to the bridge
pub struct SerialLink {
    config: LinkConfig,
    port: Option<Box<dyn SerialPort>>,
    buffer: Vec<u8>,
    state: LinkState,
    stats: LinkStats,
}

impl SerialLink {
    /// Open the configured serial device.
    ///
    /// Failure here is fatal to the process; there is nothing to fall back to.
    pub fn open(config: LinkConfig) -> Result<Self, LinkError> {
        config.validate()?;
        let mut link = Self {
            config,
            port: None,
            buffer: Vec::new(),
            state: LinkState::Closed,
            stats: LinkStats::default(),
        };
        link.open_port()?;
        Ok(link)
    }

    /// Get the link configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn open_port(&mut self) -> Result<(), LinkError> {
        info!(port = %self.config.port, baud = self.config.baud_rate, "Opening serial port");
        let mut builder = serialport::new(self.config.port.as_str(), self.config.baud_rate)
            .timeout(self.config.line_timeout());
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder.open().map_err(|e| LinkError::OpenFailed {
            port: self.config.port.clone(),
            reason: e.to_string(),
        })?;
        self.port = Some(port);
        self.buffer.clear();
        self.state = LinkState::Open;
        info!(port = %self.config.port, "Successfully opened serial port");
        Ok(())
    }
}

/// Pop one complete line off the front of `buffer`
fn split_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&raw).trim().to_string())
}

impl Link for SerialLink {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        if let Some(line) = split_line(&mut self.buffer) {
            self.stats.lines_received += 1;
            return Ok(Some(line));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.stats.read_timeouts += 1;
                return Ok(None);
            }

            let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
            port.set_timeout(remaining)
                .map_err(|e| LinkError::Io(e.to_string()))?;

            match port.read(&mut chunk) {
                Ok(0) => continue,
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(line) = split_line(&mut self.buffer) {
                        self.stats.lines_received += 1;
                        return Ok(Some(line));
                    }
                    if self.buffer.len() > self.config.max_line_len {
                        warn!(len = self.buffer.len(), "Discarding over-long partial line");
                        self.buffer.clear();
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    continue
                }
                Err(e) => {
                    self.state = LinkState::Disconnected;
                    return Err(LinkError::Disconnected(e.to_string()));
                }
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        if let Err(e) = port.write_all(bytes).and_then(|_| port.flush()) {
            self.state = LinkState::Disconnected;
            return Err(LinkError::WriteFailed(e.to_string()));
        }
        self.stats.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), LinkError> {
        self.buffer.clear();
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| LinkError::Io(e.to_string()))
    }

    fn reopen(&mut self) -> Result<(), LinkError> {
        debug!(port = %self.config.port, "Reopening serial port");
        self.close();
        self.stats.reopens += 1;
        self.open_port()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.config.port, "Closed serial port");
        }
        self.buffer.clear();
        self.state = LinkState::Closed;
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn stats(&self) -> LinkStats {
        self.stats.clone()
    }
}
