use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use crate::config::SerialEndpoint;
use crate::drivers::{Instrument, InstrumentError};

/// ASCII instrument on a serial line (or a GPIB-to-serial adapter).
///
/// Requests are single lines; a query expects a single-line numeric reply.
pub struct SerialInstrument {
    name: String,
    line_ending: &'static str,
    port: Option<Box<dyn SerialPort>>,
    read_buf: Vec<u8>,
}

impl SerialInstrument {
    pub fn open(
        name: &str,
        endpoint: &SerialEndpoint,
        timeout: Duration,
    ) -> Result<Self, InstrumentError> {
        let port = serialport::new(&endpoint.port, endpoint.baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| InstrumentError::Open {
                instrument: name.to_owned(),
                reason: format!("{}: {e}", endpoint.port),
            })?;
        log::info!("{name} open on {} @ {} baud", endpoint.port, endpoint.baud_rate);
        Ok(Self {
            name: name.to_owned(),
            line_ending: "\n",
            port: Some(port),
            read_buf: Vec::with_capacity(64),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, InstrumentError> {
        let name = &self.name;
        self.port.as_mut().ok_or_else(|| InstrumentError::Closed {
            instrument: name.clone(),
        })
    }

    fn io_error(&self, request: &str, source: io::Error) -> InstrumentError {
        if source.kind() == io::ErrorKind::TimedOut {
            InstrumentError::Timeout {
                instrument: self.name.clone(),
                request: request.to_owned(),
                after: self
                    .port
                    .as_ref()
                    .map(|p| p.timeout())
                    .unwrap_or_default(),
            }
        } else {
            InstrumentError::Io {
                instrument: self.name.clone(),
                source,
            }
        }
    }

    fn send_line(&mut self, line: &str) -> io::Result<()> {
        let framed = format!("{line}{}", self.line_ending);
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        port.write_all(framed.as_bytes())?;
        port.flush()
    }
}

/// Longest reply accepted from an instrument, terminator excluded.
const MAX_LINE: usize = 256;

/// Reads up to and including the next LF and returns the line without its terminator, or
/// `None` when no LF arrives within [`MAX_LINE`] bytes.
fn read_line<R: Read + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>> {
    buf.clear();
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte)?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        if byte[0] == b'\n' {
            break;
        }
        if buf.len() == MAX_LINE {
            return Ok(None);
        }
        buf.push(byte[0]);
    }
    Ok(Some(String::from_utf8_lossy(buf).trim().to_owned()))
}

impl Instrument for SerialInstrument {
    fn name(&self) -> &str {
        &self.name
    }
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.port()?;
        self.send_line(command)
            .map_err(|e| self.io_error(command, e))
    }
    fn query(&mut self, request: &str) -> Result<f64, InstrumentError> {
        // leftovers from a timed-out exchange would be taken as this reply
        let cleared = self.port()?.clear(ClearBuffer::Input);
        cleared.map_err(|e| InstrumentError::Io {
            instrument: self.name.clone(),
            source: e.into(),
        })?;
        self.send_line(request)
            .map_err(|e| self.io_error(request, e))?;
        let Some(port) = self.port.as_mut() else {
            return Err(InstrumentError::Closed {
                instrument: self.name.clone(),
            });
        };
        let line = read_line(port, &mut self.read_buf);
        let reply = match line.map_err(|e| self.io_error(request, e))? {
            Some(reply) => reply,
            None => {
                return Err(InstrumentError::BadReply {
                    instrument: self.name.clone(),
                    request: request.to_owned(),
                    reply: format!("no line end within {MAX_LINE} bytes"),
                })
            }
        };
        reply.parse::<f64>().map_err(|_| InstrumentError::BadReply {
            instrument: self.name.clone(),
            request: request.to_owned(),
            reply,
        })
    }
    fn close(&mut self) -> Result<(), InstrumentError> {
        match self.port.take() {
            Some(_) => {
                log::info!("{} closed", self.name);
                Ok(())
            }
            None => Err(InstrumentError::Closed {
                instrument: self.name.clone(),
            }),
        }
    }
}
