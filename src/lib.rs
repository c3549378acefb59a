#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

//! This crate turns the raw byte stream of one accepted TCP connection into
//! a structured HTTP/1.x request -- method, path, version, headers, and
//! (when present) a `multipart/form-data` body of plain fields and file
//! attachments streamed to caller-supplied sinks -- and then drives writing
//! a response back on the same connection.  The transport itself (socket
//! accept, read/write scheduling) stays outside: [`Connection`] is a push
//! driven state machine fed by whatever event loop or worker owns the
//! socket.

mod connection;
mod error;
mod multipart;
mod request;
mod response;

pub use crate::connection::{Connection, Phase, Progress};
pub use crate::error::Error;
pub use crate::multipart::{FileSinks, Sink, SinkOpener};
pub use crate::request::{FilePart, HttpVersion, Method, ParseStatus, Request};
pub use crate::response::Response;

// This is the character sequence corresponding to a carriage return (CR)
// followed by a line feed (LF), which officially delimits each
// line of an HTTP request.
const CRLF: &str = "\r\n";

fn find_crlf<T>(message: T) -> Option<usize>
    where T: AsRef<[u8]>
{
    let message = message.as_ref();
    match message.len() {
        0 | 1 => None,
        len => {
            for i in 0..len-1 {
                if
                    message[i] == b'\r'
                    && message[i+1] == b'\n'
                {
                    return Some(i)
                }
            }
            None
        }
    }
}
