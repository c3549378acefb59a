//! Per-connection lifecycle state machine.
//!
//! One [`Connection`] exists per accepted socket and is never shared.  The
//! owning worker pushes inbound chunks in with [`Connection::receive`],
//! forwards the serialized bytes of [`Connection::respond`] to its
//! transport, and reports write completions through
//! [`Connection::written`].  Each call runs parsing to a fixed point;
//! waiting for more bytes is a normal suspension, not an error.

use tracing::{debug, trace};

use super::error::Error;
use super::multipart::{self, SinkOpener};
use super::request::{ParseStatus, Request};
use super::response::Response;

const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data; ";
const TERMINAL_MARKER: &[u8] = b"--\r\n";

/// Lifecycle phase of one connection.  Phases only ever advance; a single
/// request is processed per connection lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    AwaitingRequestLine,
    ParsingHeaders,
    ReceivingMultipartBody,
    RequestReady,
    Sending,
    Closed,
}

/// Outcome of feeding bytes to a connection.
#[derive(Debug)]
pub enum Progress {
    /// More bytes are needed before the request is complete.
    Pending,
    /// The request is complete; ownership passes to the caller, exactly
    /// once.
    Ready(Request),
}

pub struct Connection {
    phase: Phase,
    buffer: Vec<u8>,
    // Read offset into `buffer`; consumed bytes stay in place rather than
    // being repeatedly sliced off the front.
    offset: usize,
    boundary: Option<Vec<u8>>,
    request: Request,
    pub max_buffer_size: Option<usize>,
    response_size: usize,
    bytes_written: usize,
}

impl Connection {
    #[must_use]
    pub fn new() -> Self {
        Self{
            phase: Phase::AwaitingRequestLine,
            buffer: Vec::new(),
            offset: 0,
            boundary: None,
            request: Request::new(),
            max_buffer_size: Some(10_000_000),
            response_size: 0,
            bytes_written: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!(?phase, "connection phase change");
        self.phase = phase;
    }

    /// Feed one inbound chunk from the transport.
    ///
    /// Bytes accumulate across calls; the request is emitted through
    /// [`Progress::Ready`] as soon as it is complete.  Chunks arriving
    /// after that point are ignored.
    pub fn receive(
        &mut self,
        chunk: &[u8],
        sinks: &mut dyn SinkOpener,
    ) -> Result<Progress, Error> {
        trace!(bytes = chunk.len(), "bytes received");
        if !matches!(
            self.phase,
            Phase::AwaitingRequestLine
            | Phase::ParsingHeaders
            | Phase::ReceivingMultipartBody
        ) {
            return Ok(Progress::Pending);
        }
        self.buffer.extend_from_slice(chunk);
        if let Some(limit) = self.max_buffer_size {
            if self.buffer.len() > limit {
                return Err(Error::MessageTooLong);
            }
        }
        loop {
            match self.phase {
                Phase::AwaitingRequestLine | Phase::ParsingHeaders => {
                    let (status, consumed) = self.request
                        .parse_head(&self.buffer[self.offset..])?;
                    self.offset += consumed;
                    if self.phase == Phase::AwaitingRequestLine
                        && self.request.past_request_line()
                    {
                        self.set_phase(Phase::ParsingHeaders);
                    }
                    match status {
                        ParseStatus::Incomplete => return Ok(Progress::Pending),
                        ParseStatus::Complete => {
                            let boundary = self.request
                                .header_value("Content-Type")
                                .and_then(|value| {
                                    value.strip_prefix(MULTIPART_CONTENT_TYPE)
                                })
                                .map(|token| token.as_bytes().to_vec());
                            match boundary {
                                Some(token) => {
                                    self.boundary = Some(token);
                                    self.set_phase(Phase::ReceivingMultipartBody);
                                },
                                None => {
                                    self.set_phase(Phase::RequestReady);
                                    return Ok(Progress::Ready(
                                        std::mem::take(&mut self.request)
                                    ));
                                },
                            }
                        },
                    }
                },
                Phase::ReceivingMultipartBody => {
                    // Scan the whole accumulated body, not just the newest
                    // chunk, so a terminal marker straddling two chunks is
                    // still found.
                    if multipart::find_marker(
                        &self.buffer[self.offset..],
                        TERMINAL_MARKER,
                    ).is_none() {
                        return Ok(Progress::Pending);
                    }
                    let boundary = self.boundary.clone().unwrap_or_default();
                    multipart::decode(
                        &boundary,
                        &self.buffer[self.offset..],
                        &mut self.request,
                        sinks,
                    )?;
                    self.offset = self.buffer.len();
                    self.set_phase(Phase::RequestReady);
                    return Ok(Progress::Ready(
                        std::mem::take(&mut self.request)
                    ));
                },
                _ => return Ok(Progress::Pending),
            }
        }
    }

    /// Serialize the handler's response and move to `Sending`.
    ///
    /// The returned bytes are the caller's to hand to the transport; write
    /// completions come back through [`Connection::written`].
    pub fn respond(&mut self, response: &Response) -> Result<Vec<u8>, Error> {
        if self.phase != Phase::RequestReady {
            return Err(Error::ResponseOutOfTurn);
        }
        let output = response.generate()?;
        self.response_size = output.len();
        self.bytes_written = 0;
        self.set_phase(Phase::Sending);
        Ok(output)
    }

    /// Record a write-completion notification from the transport.
    ///
    /// Returns `true` once the whole response has been written; the
    /// connection is then `Closed` and the caller should close the
    /// transport.
    pub fn written(&mut self, bytes: usize) -> bool {
        if self.phase != Phase::Sending {
            return false;
        }
        self.bytes_written += bytes;
        if self.bytes_written >= self.response_size {
            self.set_phase(Phase::Closed);
            true
        } else {
            false
        }
    }

    /// Abandon the connection, e.g. on a transport failure notification.
    ///
    /// Buffers are released and any partial request is discarded.
    pub fn abort(&mut self) {
        self.buffer = Vec::new();
        self.offset = 0;
        self.boundary = None;
        self.request = Request::new();
        self.set_phase(Phase::Closed);
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
