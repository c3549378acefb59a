/// This is the enumeration of all the different kinds of errors which this
/// crate generates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header line contained bytes which are not valid text.
    #[error("header line is not valid text")]
    HeaderLineNotValidText(Vec<u8>),

    /// The accumulated request exceeds the configured size limit.
    #[error("message exceeds maximum size limit")]
    MessageTooLong,

    /// The attached bytes followed a part marker in the place where the
    /// boundary token and a line terminator were expected.
    #[error("unexpected bytes after multipart part marker")]
    MultipartDelimiterInvalid(Vec<u8>),

    /// The file name could not be extracted from the attached
    /// `Content-Disposition` line.
    #[error("unable to parse file name from Content-Disposition line")]
    MultipartDispositionFileName(String),

    /// The field name could not be extracted from the attached
    /// `Content-Disposition` line.
    #[error("unable to parse field name from Content-Disposition line")]
    MultipartDispositionName(String),

    /// The body ended before the delimiter closing the current part was
    /// found, so the part's content is not all here.
    #[error("multipart body ended before its closing delimiter")]
    MultipartIncomplete,

    /// A part's header block has no `Content-Disposition` line.
    #[error("multipart part is missing its Content-Disposition line")]
    MultipartMissingContentDisposition,

    /// A file part's header block has no `Content-Type` line.
    #[error("multipart file part is missing its Content-Type line")]
    MultipartMissingContentType,

    /// A line terminator required by the multipart structure is missing.
    #[error("multipart part is missing a line terminator")]
    MultipartMissingLineTerminator,

    /// No path could be parsed from the HTTP request line attached.  Either
    /// there is no `/`, or no space follows it.
    #[error("unable to parse path from request line")]
    RequestLineMissingPath(Vec<u8>),

    /// The attached bytes are the beginning of the request line, whose length
    /// exceeds the request line limit.
    #[error("request line too long")]
    RequestLineTooLong(Vec<u8>),

    /// A response was offered while no completed request was waiting for
    /// one.
    #[error("no completed request is awaiting a response")]
    ResponseOutOfTurn,

    /// The sink for the attached file part could not be opened, written,
    /// or closed.
    #[error("unable to stream file part {file_name:?} to its sink")]
    Sink {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    /// An error occurred during string formatting.
    #[error("error during string format")]
    StringFormat,
}
