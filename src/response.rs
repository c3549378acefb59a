use std::io::Write;

use super::error::Error;

/// One HTTP/1.x response, serialized in a single pass by [`Response::generate`].
///
/// Headers keep their insertion order; setting a header that already exists
/// replaces its value.  `Content-Length` is always written by the
/// serializer itself, from the actual body length.
pub struct Response {
    pub status_code: usize,
    pub reason_phrase: std::borrow::Cow<'static, str>,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn new() -> Self {
        Self{
            status_code: 200,
            reason_phrase: "OK".into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn set_header<V>(&mut self, name: &str, value: V)
        where V: Into<String>
    {
        match self.headers.iter_mut().find(|(key, _)| key == name) {
            Some(header) => header.1 = value.into(),
            None => self.headers.push((name.to_string(), value.into())),
        }
    }

    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Serialize the status line, headers, blank line, and body into the
    /// exact outbound byte sequence.
    pub fn generate(&self) -> Result<Vec<u8>, Error> {
        let mut output = Vec::new();
        write!(&mut output, "HTTP/1.1 {} {}\r\n", self.status_code, self.reason_phrase)
            .map_err(|_| Error::StringFormat)?;
        for (name, value) in &self.headers {
            // `Content-Length` is derived below from the body itself; a
            // caller-supplied value is not trusted.
            if name == "Content-Length" {
                continue;
            }
            write!(&mut output, "{}: {}\r\n", name, value)
                .map_err(|_| Error::StringFormat)?;
        }
        if !self.body.is_empty() {
            write!(&mut output, "Content-Length: {}\r\n", self.body.len())
                .map_err(|_| Error::StringFormat)?;
        }
        output.extend_from_slice(b"\r\n");
        output.extend(&self.body);
        Ok(output)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}
