//! pigpio daemon client
//!
//! Talks to `pigpiod` over its TCP socket interface. Every command is a
//! 16-byte frame of four little-endian `u32` words (`cmd, p1, p2, p3`); the
//! daemon answers with a 16-byte frame whose last word is a signed result.
//! A negative result is a pigpio error code.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::channel::{ChannelDriver, ChannelError, ChannelId};
use crate::config_file::DaemonEndpoint;
use crate::error::ConnectionError;

/// Set GPIO mode
const CMD_MODES: u32 = 0;
/// Set PWM duty cycle
const CMD_PWM: u32 = 5;
/// Set PWM range
const CMD_PRS: u32 = 6;
/// Hardware revision
const CMD_HWVER: u32 = 17;

/// pigpio mode number for outputs
const MODE_OUTPUT: u32 = 1;

/// PWM range used for every channel
pub const PWM_RANGE: u32 = 255;

/// Encode a command frame.
pub fn encode_command(cmd: u32, p1: u32, p2: u32) -> [u8; 16] {
    let mut frame = [0u8; 16];
    frame[0..4].copy_from_slice(&cmd.to_le_bytes());
    frame[4..8].copy_from_slice(&p1.to_le_bytes());
    frame[8..12].copy_from_slice(&p2.to_le_bytes());
    // p3 (extension length) is always 0 for the commands used here
    frame
}

/// Decode the signed result word of a reply frame.
pub fn decode_result(reply: &[u8; 16]) -> i32 {
    i32::from_le_bytes([reply[12], reply[13], reply[14], reply[15]])
}

/// Connection to one pigpio daemon.
#[derive(Debug)]
pub struct PigpioClient {
    stream: Option<TcpStream>,
    endpoint: String,
    hardware_revision: u32,
}

impl PigpioClient {
    /// Connect to the daemon and confirm it answers.
    pub fn connect(endpoint: &DaemonEndpoint) -> Result<Self, ConnectionError> {
        let label = endpoint.to_string();
        let unreachable = |source: std::io::Error| ConnectionError::Unreachable {
            endpoint: label.clone(),
            source,
        };

        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(unreachable)?
            .next()
            .ok_or_else(|| {
                unreachable(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "host did not resolve to any address",
                ))
            })?;

        debug!("Connecting to pigpiod at {} ({})", label, addr);
        let stream = TcpStream::connect_timeout(&addr, endpoint.timeout()).map_err(unreachable)?;
        stream
            .set_read_timeout(Some(endpoint.timeout()))
            .map_err(unreachable)?;
        stream
            .set_write_timeout(Some(endpoint.timeout()))
            .map_err(unreachable)?;
        stream.set_nodelay(true).map_err(unreachable)?;

        let mut client = Self {
            stream: Some(stream),
            endpoint: label.clone(),
            hardware_revision: 0,
        };

        let revision = client
            .command(CMD_HWVER, 0, 0)
            .map_err(|e| ConnectionError::Protocol {
                endpoint: label.clone(),
                reason: e.to_string(),
            })?;
        client.hardware_revision = revision;
        info!(
            "Connected to pigpiod at {} (hardware revision {:#x})",
            label, revision
        );
        Ok(client)
    }

    pub fn hardware_revision(&self) -> u32 {
        self.hardware_revision
    }

    /// Send one command and return its non-negative result.
    fn command(&mut self, cmd: u32, p1: u32, p2: u32) -> Result<u32, ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Released)?;
        let lost = |e: std::io::Error| ChannelError::Disconnected {
            reason: e.to_string(),
        };

        stream.write_all(&encode_command(cmd, p1, p2)).map_err(lost)?;
        let mut reply = [0u8; 16];
        stream.read_exact(&mut reply).map_err(lost)?;

        let res = decode_result(&reply);
        if res < 0 {
            debug!("pigpiod cmd {} ({}, {}) -> error {}", cmd, p1, p2, res);
            return Err(ChannelError::Rejected { code: res });
        }
        Ok(res.unsigned_abs())
    }
}

impl ChannelDriver for PigpioClient {
    fn configure_output(&mut self, channel: ChannelId) -> Result<(), ChannelError> {
        self.command(CMD_MODES, channel, MODE_OUTPUT)?;
        self.command(CMD_PRS, channel, PWM_RANGE)?;
        Ok(())
    }

    fn set_duty(&mut self, channel: ChannelId, duty: u8) -> Result<(), ChannelError> {
        self.command(CMD_PWM, channel, u32::from(duty))?;
        Ok(())
    }

    fn release(&mut self) -> Result<(), ChannelError> {
        let stream = self.stream.take().ok_or(ChannelError::Released)?;
        // The daemon may already be gone; the socket is dropped either way
        let _ = stream.shutdown(Shutdown::Both);
        debug!("Released pigpiod connection to {}", self.endpoint);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("pigpiod at {}", self.endpoint)
    }
}
