//! Decoder for `multipart/form-data` request bodies.
//!
//! Plain fields land in the request's post-field mapping; file parts are
//! streamed to caller-supplied [`Sink`]s a bounded window at a time, so the
//! copy step's peak memory stays independent of the file size.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use super::error::Error;
use super::request::{FilePart, Request};
use super::{find_crlf, CRLF};

// Number of file-content bytes examined per scan step.
const SCAN_WINDOW: usize = 10_000;

const DASHES: &[u8] = b"--";
const BOUNDARY_PREFIX: &[u8] = b"boundary=";
const CONTENT_DISPOSITION: &[u8] = b"Content-Disposition: ";
const CONTENT_TYPE: &[u8] = b"Content-Type: ";

/// Destination for one uploaded file's content.
pub trait Sink {
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    fn close(&mut self) -> std::io::Result<()>;
}

/// Supplier of sinks, one per file part, named from the part's `filename`
/// attribute.
pub trait SinkOpener {
    fn open(&mut self, name: &str) -> std::io::Result<Box<dyn Sink>>;
}

/// Sink opener that creates regular files under a fixed directory.
///
/// The file name comes straight from the client's `filename` attribute;
/// callers wanting stricter naming should wrap this or supply their own
/// opener.
pub struct FileSinks {
    root: PathBuf,
}

impl FileSinks {
    pub fn new<P>(root: P) -> Self
        where P: Into<PathBuf>
    {
        Self{
            root: root.into(),
        }
    }
}

impl SinkOpener for FileSinks {
    fn open(&mut self, name: &str) -> std::io::Result<Box<dyn Sink>> {
        Ok(Box::new(FileSink(File::create(self.root.join(name))?)))
    }
}

struct FileSink(File);

impl Sink for FileSink {
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.0.write_all(bytes)
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

pub(crate) fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    haystack
        .windows(marker.len())
        .position(|window| window == marker)
}

fn quoted_attribute(segment: &str, marker: &str) -> Option<String> {
    let start = segment.find(marker)? + marker.len();
    let value = &segment[start..];
    let value = value.strip_prefix('"').unwrap_or(value);
    let value = value.strip_suffix('"').unwrap_or(value);
    Some(value.to_string())
}

fn sink_error(file_name: &str, source: std::io::Error) -> Error {
    Error::Sink{
        file_name: file_name.to_string(),
        source,
    }
}

/// Decode an accumulated `multipart/form-data` body onto the given request.
///
/// The boundary token may still carry its `boundary=` prefix from the
/// `Content-Type` header; it is stripped here.  Decoding runs part by part
/// until the terminal delimiter, filling `request.post_fields` and
/// `request.file_parts` as it goes; any structural hole surfaces as a
/// distinct error rather than a silently truncated request.
pub(crate) fn decode(
    boundary: &[u8],
    body: &[u8],
    request: &mut Request,
    sinks: &mut dyn SinkOpener,
) -> Result<(), Error> {
    let boundary = match find_marker(boundary, BOUNDARY_PREFIX) {
        Some(index) => &boundary[index + BOUNDARY_PREFIX.len()..],
        None => boundary,
    };
    let mut cursor = 0;
    loop {
        // Each part opens with a `--` marker followed by the boundary; a
        // trailing `--` instead of a line terminator is the terminal
        // delimiter.
        cursor = match find_marker(&body[cursor..], DASHES) {
            Some(index) => cursor + index + DASHES.len(),
            None => return Ok(()),
        };
        if !body[cursor..].starts_with(boundary) {
            return Err(Error::MultipartDelimiterInvalid(snippet(&body[cursor..])));
        }
        cursor += boundary.len();
        if body[cursor..].starts_with(DASHES) {
            return Ok(());
        }
        if !body[cursor..].starts_with(CRLF.as_bytes()) {
            return Err(Error::MultipartDelimiterInvalid(snippet(&body[cursor..])));
        }
        cursor += CRLF.len();

        cursor = match find_marker(&body[cursor..], CONTENT_DISPOSITION) {
            Some(index) => cursor + index + CONTENT_DISPOSITION.len(),
            None => return Err(Error::MultipartMissingContentDisposition),
        };
        let line_end = find_crlf(&body[cursor..])
            .ok_or(Error::MultipartMissingLineTerminator)?;
        let disposition_line = &body[cursor..cursor+line_end];
        let disposition_line = std::str::from_utf8(disposition_line)
            .map_err(|_| Error::HeaderLineNotValidText(disposition_line.to_vec()))?;
        cursor += line_end + CRLF.len();

        let segments: Vec<&str> = disposition_line.split(';').collect();
        let field_name = segments.get(1)
            .and_then(|segment| quoted_attribute(segment, "name="))
            .ok_or_else(|| Error::MultipartDispositionName(disposition_line.to_string()))?;

        if segments.len() == 2 {
            // Plain field: a blank line ends the part's headers, then the
            // value runs to the next line terminator.
            if !body[cursor..].starts_with(CRLF.as_bytes()) {
                return Err(Error::MultipartMissingLineTerminator);
            }
            cursor += CRLF.len();
            let value_end = find_crlf(&body[cursor..])
                .ok_or(Error::MultipartMissingLineTerminator)?;
            request.post_fields.insert(
                field_name,
                body[cursor..cursor+value_end].to_vec(),
            );
            cursor += value_end + CRLF.len();
        } else {
            let file_name = quoted_attribute(segments[2], "filename=")
                .ok_or_else(|| Error::MultipartDispositionFileName(disposition_line.to_string()))?;
            cursor = match find_marker(&body[cursor..], CONTENT_TYPE) {
                Some(index) => cursor + index + CONTENT_TYPE.len(),
                None => return Err(Error::MultipartMissingContentType),
            };
            let mime_end = find_crlf(&body[cursor..])
                .ok_or(Error::MultipartMissingLineTerminator)?;
            let mime_type = &body[cursor..cursor+mime_end];
            let mime_type = std::str::from_utf8(mime_type)
                .map_err(|_| Error::HeaderLineNotValidText(mime_type.to_vec()))?
                .to_string();
            cursor += mime_end + CRLF.len();
            if !body[cursor..].starts_with(CRLF.as_bytes()) {
                return Err(Error::MultipartMissingLineTerminator);
            }
            cursor += CRLF.len();
            cursor += stream_file_content(
                &body[cursor..],
                boundary,
                &file_name,
                sinks,
            )?;
            request.file_parts.push(FilePart{
                field_name,
                file_name,
                mime_type,
            });
        }
    }
}

/// Copy file content to its sink one window at a time, stopping at the
/// `CRLF --boundary` delimiter so the sink receives the payload
/// byte-for-byte.  Returns how many content bytes were consumed, leaving
/// the cursor on the delimiter's `--` marker for the outer loop.
fn stream_file_content(
    content: &[u8],
    boundary: &[u8],
    file_name: &str,
    sinks: &mut dyn SinkOpener,
) -> Result<usize, Error> {
    let mut marker = Vec::with_capacity(CRLF.len() + DASHES.len() + boundary.len());
    marker.extend_from_slice(CRLF.as_bytes());
    marker.extend_from_slice(DASHES);
    marker.extend_from_slice(boundary);

    // The window has to be able to contain the delimiter whole, whatever
    // boundary the client declared.
    let window_size = SCAN_WINDOW.max(marker.len() + 1);

    let mut sink = sinks.open(file_name)
        .map_err(|source| sink_error(file_name, source))?;
    let mut cursor = 0;
    loop {
        let window_end = content.len().min(cursor + window_size);
        let window = &content[cursor..window_end];
        match find_marker(window, &marker) {
            Some(index) => {
                sink.append(&window[..index])
                    .map_err(|source| sink_error(file_name, source))?;
                sink.close()
                    .map_err(|source| sink_error(file_name, source))?;
                return Ok(cursor + index + CRLF.len());
            },
            None if window_end == content.len() => {
                // Ran out of body without finding the delimiter.
                return Err(Error::MultipartIncomplete);
            },
            None => {
                // The delimiter may straddle the window edge; hold back
                // enough bytes for the next scan to see it whole.
                let advance = window.len() - (marker.len() - 1);
                sink.append(&window[..advance])
                    .map_err(|source| sink_error(file_name, source))?;
                cursor += advance;
            },
        }
    }
}

fn snippet(bytes: &[u8]) -> Vec<u8> {
    bytes[..bytes.len().min(32)].to_vec()
}


#[cfg(test)]
mod tests {

    use super::testing::{FailingSinks, FaultySinks, MemorySinks};
    use super::*;

    fn decode_into(
        boundary: &str,
        body: &[u8],
        sinks: &mut dyn SinkOpener,
    ) -> Result<Request, Error> {
        let mut request = Request::new();
        decode(boundary.as_bytes(), body, &mut request, sinks)?;
        Ok(request)
    }

    #[test]
    fn decode_plain_field() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"x\"\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        let request = decode_into("B", body.as_bytes(), &mut sinks).unwrap();
        assert_eq!(Some(&b"hello"[..]), request.post_value("x"));
        assert!(request.file_parts.is_empty());
        assert!(sinks.files.is_empty());
    }

    #[test]
    fn decode_strips_boundary_prefix() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"x\"\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        let request = decode_into("boundary=B", body.as_bytes(), &mut sinks).unwrap();
        assert_eq!(Some(&b"hello"[..]), request.post_value("x"));
    }

    #[test]
    fn decode_file_part() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "dear diary\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        let request = decode_into("B", body.as_bytes(), &mut sinks).unwrap();
        assert_eq!(
            vec![FilePart{
                field_name: "upload".to_string(),
                file_name: "notes.txt".to_string(),
                mime_type: "text/plain".to_string(),
            }],
            request.file_parts
        );
        assert_eq!(Some(b"dear diary".to_vec()), sinks.contents("notes.txt"));
        assert!(*sinks.files[0].2.borrow());
    }

    #[test]
    fn decode_field_then_file() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n",
            "\r\n",
            "holiday photo\r\n",
            "--B\r\n",
            "Content-Disposition: form-data; name=\"photo\"; filename=\"beach.jpg\"\r\n",
            "Content-Type: image/jpeg\r\n",
            "\r\n",
            "JFIF...pretend this is a JPEG\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        let request = decode_into("B", body.as_bytes(), &mut sinks).unwrap();
        assert_eq!(Some(&b"holiday photo"[..]), request.post_value("title"));
        assert_eq!(1, request.file_parts.len());
        assert_eq!(
            Some(b"JFIF...pretend this is a JPEG".to_vec()),
            sinks.contents("beach.jpg")
        );
    }

    #[test]
    fn decode_file_then_field() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"photo\"; filename=\"beach.jpg\"\r\n",
            "Content-Type: image/jpeg\r\n",
            "\r\n",
            "pixels\r\n",
            "--B\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n",
            "\r\n",
            "holiday photo\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        let request = decode_into("B", body.as_bytes(), &mut sinks).unwrap();
        assert_eq!(Some(b"pixels".to_vec()), sinks.contents("beach.jpg"));
        assert_eq!(Some(&b"holiday photo"[..]), request.post_value("title"));
    }

    #[test]
    fn file_content_spanning_many_scan_windows_is_byte_for_byte() {
        let payload: Vec<u8> = (0..25_000_usize)
            .map(|i| (i % 256) as u8)
            .collect();
        let mut body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"blob\"; filename=\"data.bin\"\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
        ).as_bytes().to_vec();
        body.extend_from_slice(&payload);
        body.extend_from_slice(b"\r\n--B--\r\n");
        let mut sinks = MemorySinks::default();
        let request = decode_into("B", &body, &mut sinks).unwrap();
        assert_eq!(1, request.file_parts.len());
        assert_eq!(Some(payload), sinks.contents("data.bin"));
    }

    #[test]
    fn delimiter_straddling_scan_window_edge_is_reassembled() {
        // 9,998 content bytes put the `\r\n--B` delimiter's first two bytes
        // inside the 10,000-byte window and the rest beyond it; the held
        // back tail has to carry them into the next scan.
        let payload: Vec<u8> = (0..9_998_usize)
            .map(|i| (i % 256) as u8)
            .collect();
        let mut body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"blob\"; filename=\"data.bin\"\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
        ).as_bytes().to_vec();
        body.extend_from_slice(&payload);
        body.extend_from_slice(b"\r\n--B--\r\n");
        let mut sinks = MemorySinks::default();
        let request = decode_into("B", &body, &mut sinks).unwrap();
        assert_eq!(1, request.file_parts.len());
        assert_eq!(Some(payload), sinks.contents("data.bin"));
    }

    #[test]
    fn missing_terminal_delimiter_is_reported() {
        let mut body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"blob\"; filename=\"data.bin\"\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
        ).as_bytes().to_vec();
        body.extend_from_slice(&[b'x'; 1000]);
        let mut sinks = MemorySinks::default();
        assert!(matches!(
            decode_into("B", &body, &mut sinks),
            Err(Error::MultipartIncomplete)
        ));
    }

    #[test]
    fn missing_content_disposition_is_reported() {
        let body = concat!(
            "--B\r\n",
            "X-Not-A-Disposition: form-data; name=\"x\"\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut sinks),
            Err(Error::MultipartMissingContentDisposition)
        ));
    }

    #[test]
    fn missing_name_attribute_is_reported() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut sinks),
            Err(Error::MultipartDispositionName(_))
        ));
    }

    #[test]
    fn missing_filename_attribute_is_reported() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"f\"; foo=\"bar\"\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut sinks),
            Err(Error::MultipartDispositionFileName(_))
        ));
    }

    #[test]
    fn missing_content_type_on_file_part_is_reported() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut sinks),
            Err(Error::MultipartMissingContentType)
        ));
    }

    #[test]
    fn wrong_boundary_is_reported() {
        let body = concat!(
            "--NOTB\r\n",
            "Content-Disposition: form-data; name=\"x\"\r\n",
            "\r\n",
            "hello\r\n",
            "--NOTB--\r\n",
        );
        let mut sinks = MemorySinks::default();
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut sinks),
            Err(Error::MultipartDelimiterInvalid(_))
        ));
    }

    #[test]
    fn sink_open_failure_is_reported() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut FailingSinks),
            Err(Error::Sink{..})
        ));
    }

    #[test]
    fn sink_append_failure_is_reported() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = FaultySinks{
            fail_append: true,
            fail_close: false,
        };
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut sinks),
            Err(Error::Sink{..})
        ));
    }

    #[test]
    fn sink_close_failure_is_reported() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "hello\r\n",
            "--B--\r\n",
        );
        let mut sinks = FaultySinks{
            fail_append: false,
            fail_close: true,
        };
        assert!(matches!(
            decode_into("B", body.as_bytes(), &mut sinks),
            Err(Error::Sink{..})
        ));
    }

    #[test]
    fn field_value_may_contain_dashes() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"x\"\r\n",
            "\r\n",
            "well--actually\r\n",
            "--B--\r\n",
        );
        let mut sinks = MemorySinks::default();
        let request = decode_into("B", body.as_bytes(), &mut sinks).unwrap();
        assert_eq!(Some(&b"well--actually"[..]), request.post_value("x"));
    }
}
