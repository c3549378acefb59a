use std::collections::HashMap;

use super::error::Error;
use super::{find_crlf, CRLF};

/// Request methods understood by the parser.
///
/// Only the first three bytes of the request line are inspected, so any
/// method outside this set collapses to `Unsupported` rather than failing
/// the parse.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Head,
    Post,
    Unsupported,
}

impl Method {
    fn from_prefix(line: &[u8]) -> Self {
        match line.get(..3) {
            Some(b"GET") => Self::Get,
            Some(b"POS") => Self::Post,
            Some(b"HEA") => Self::Head,
            _ => Self::Unsupported,
        }
    }
}

/// Protocol versions recognized on the request line.  Anything other than
/// an exact `HTTP/1.1` or `HTTP/1.0` token is `Unknown`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
    Unknown,
}

impl HttpVersion {
    fn from_token(token: &[u8]) -> Self {
        match token {
            b"HTTP/1.1" => Self::V1_1,
            b"HTTP/1.0" => Self::V1_0,
            _ => Self::Unknown,
        }
    }
}

/// Record of one decoded file attachment.  The content itself has already
/// been streamed to the sink opened under `file_name`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Debug, Eq, PartialEq)]
enum HeadState {
    Complete,
    Headers,
    RequestLine,
}

#[derive(Debug, Eq, PartialEq)]
pub enum ParseStatus {
    Complete,
    Incomplete,
}

enum ParseStatusInternal {
    CompletePart,
    CompleteWhole,
    Incomplete,
}

/// One HTTP/1.x request, filled incrementally as bytes arrive.
///
/// `parse_head` consumes the request line and headers; post fields and file
/// parts are added later by the multipart decoder when the body calls for
/// it.  The path is kept raw and un-decoded, and header keys are stored
/// exactly as received (duplicates keep the last value).
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: Vec<u8>,
    pub version: HttpVersion,
    pub headers: HashMap<String, String>,
    pub post_fields: HashMap<String, Vec<u8>>,
    pub file_parts: Vec<FilePart>,
    pub request_line_limit: Option<usize>,
    state: HeadState,
}

impl Request {
    /// Feed bytes to the request line and header parser.
    ///
    /// Returns how far parsing got and how many bytes were consumed; whole
    /// lines only, so a buffer ending mid-line reports `Incomplete` without
    /// error and the same bytes may be offered again later along with more.
    pub fn parse_head<T>(
        &mut self,
        raw_message: T,
    ) -> Result<(ParseStatus, usize), Error>
        where T: AsRef<[u8]>
    {
        let raw_message = raw_message.as_ref();
        let mut total_consumed = 0;
        loop {
            let raw_message_remainder = &raw_message[total_consumed..];
            let (parse_status, consumed) = match self.state {
                HeadState::Complete => (ParseStatusInternal::CompleteWhole, 0),
                HeadState::Headers => {
                    self.parse_message_for_header_line(raw_message_remainder)?
                },
                HeadState::RequestLine => {
                    self.parse_message_for_request_line(raw_message_remainder)?
                },
            };
            total_consumed += consumed;
            match parse_status {
                ParseStatusInternal::CompletePart => (),
                ParseStatusInternal::CompleteWhole => {
                    return Ok((ParseStatus::Complete, total_consumed));
                },
                ParseStatusInternal::Incomplete => {
                    return Ok((ParseStatus::Incomplete, total_consumed));
                },
            };
        }
    }

    fn parse_message_for_request_line(
        &mut self,
        raw_message: &[u8],
    ) -> Result<(ParseStatusInternal, usize), Error> {
        match (find_crlf(raw_message), self.request_line_limit) {
            (Some(request_line_end), Some(limit)) if request_line_end > limit => {
                Err(Error::RequestLineTooLong(raw_message[..limit].to_vec()))
            },
            (Some(request_line_end), _) => {
                let request_line = &raw_message[0..request_line_end];
                self.method = Method::from_prefix(request_line);
                let path_start = request_line.iter()
                    .position(|&byte| byte == b'/')
                    .ok_or_else(|| Error::RequestLineMissingPath(request_line.to_vec()))?;
                let path_end = request_line[path_start..].iter()
                    .position(|&byte| byte == b' ')
                    .map(|index| path_start + index)
                    .ok_or_else(|| Error::RequestLineMissingPath(request_line.to_vec()))?;
                self.path = request_line[path_start..path_end].to_vec();
                self.version = HttpVersion::from_token(&request_line[path_end+1..]);
                self.state = HeadState::Headers;
                Ok((ParseStatusInternal::CompletePart, request_line_end + CRLF.len()))
            },
            (None, Some(limit)) if raw_message.len() > limit => {
                Err(Error::RequestLineTooLong(raw_message[..limit].to_vec()))
            },
            (None, _) => Ok((ParseStatusInternal::Incomplete, 0)),
        }
    }

    fn parse_message_for_header_line(
        &mut self,
        raw_message: &[u8],
    ) -> Result<(ParseStatusInternal, usize), Error> {
        match find_crlf(raw_message) {
            // An empty line ends the header section; the bytes that follow
            // begin the body.
            Some(0) => {
                self.state = HeadState::Complete;
                Ok((ParseStatusInternal::CompleteWhole, CRLF.len()))
            },
            Some(header_line_end) => {
                let header_line = &raw_message[0..header_line_end];
                let header_line = std::str::from_utf8(header_line)
                    .map_err(|_| Error::HeaderLineNotValidText(header_line.to_vec()))?;
                let (key, value) = match header_line.find(':') {
                    Some(colon) => {
                        // Everything after the first colon, minus one
                        // leading space; further colons stay in the value.
                        let value = &header_line[colon+1..];
                        let value = value.strip_prefix(' ').unwrap_or(value);
                        (&header_line[..colon], value)
                    },
                    None => (header_line, ""),
                };
                self.headers.insert(key.to_string(), value.to_string());
                Ok((ParseStatusInternal::CompletePart, header_line_end + CRLF.len()))
            },
            None => Ok((ParseStatusInternal::Incomplete, 0)),
        }
    }

    /// Look up a header value by its exact key, as received on the wire.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Look up a decoded post field by name.
    #[must_use]
    pub fn post_value(&self, name: &str) -> Option<&[u8]> {
        self.post_fields.get(name).map(Vec::as_slice)
    }

    pub(crate) fn past_request_line(&self) -> bool {
        self.state != HeadState::RequestLine
    }

    #[must_use]
    pub fn new() -> Self {
        Self{
            method: Method::Unsupported,
            path: Vec::new(),
            version: HttpVersion::Unknown,
            headers: HashMap::new(),
            post_fields: HashMap::new(),
            file_parts: Vec::new(),
            request_line_limit: Some(1000),
            state: HeadState::RequestLine,
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}
