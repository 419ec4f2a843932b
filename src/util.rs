use crate::{bstr::Bstr, config::HtpServerPersonality, error::Result, hook::FileDataHook};
use nom::{
    bytes::complete::{tag_no_case, take, take_till, take_while, take_while1},
    bytes::streaming::take_till as streaming_take_till,
    character::is_space as nom_is_space,
    combinator::map,
    sequence::tuple,
    IResult,
};
use std::io::Write;
use tempfile::{Builder, NamedTempFile};

/// Trait to allow interacting with flag bitsets.
pub trait FlagOperations<T> {
    /// Inserts the specified flags in-place.
    fn set(&mut self, other: T);
    /// Removes the specified flags in-place.
    fn unset(&mut self, other: T);
    /// Determine if the specified flags are set.
    fn is_set(&self, other: T) -> bool;
}

impl FlagOperations<u8> for u8 {
    fn set(&mut self, other: u8) {
        *self |= other;
    }
    fn unset(&mut self, other: u8) {
        *self &= !other;
    }
    fn is_set(&self, other: u8) -> bool {
        self & other == other
    }
}

impl FlagOperations<u64> for u64 {
    fn set(&mut self, other: u64) {
        *self |= other;
    }
    fn unset(&mut self, other: u64) {
        *self &= !other;
    }
    fn is_set(&self, other: u64) -> bool {
        self & other == other
    }
}

/// Various transaction and field flags. These are all in one namespace
/// because the same flag is often set both on the field that exhibits an
/// anomaly and on the transaction that contains it.
pub struct HtpFlags;

impl HtpFlags {
    /// Field cannot be parsed.
    pub const FIELD_UNPARSEABLE: u64 = 0x0000_0000_0004;
    /// Field is invalid.
    pub const FIELD_INVALID: u64 = 0x0000_0000_0008;
    /// Field content is folded.
    pub const FIELD_FOLDED: u64 = 0x0000_0000_0010;
    /// Field has been seen more than once.
    pub const FIELD_REPEATED: u64 = 0x0000_0000_0020;
    /// Field is too long.
    pub const FIELD_LONG: u64 = 0x0000_0000_0040;
    /// Field contains raw NUL byte.
    pub const FIELD_RAW_NUL: u64 = 0x0000_0000_0080;
    /// Detect HTTP request smuggling.
    pub const REQUEST_SMUGGLING: u64 = 0x0000_0000_0100;
    /// Invalid header folding.
    pub const INVALID_FOLDING: u64 = 0x0000_0000_0200;
    /// Invalid request transfer-encoding.
    pub const REQUEST_INVALID_T_E: u64 = 0x0000_0000_0400;
    /// Multiple chunks of the request head.
    pub const MULTI_PACKET_HEAD: u64 = 0x0000_0000_0800;
    /// No host information in header.
    pub const HOST_MISSING: u64 = 0x0000_0000_1000;
    /// Inconsistent host or port information.
    pub const HOST_AMBIGUOUS: u64 = 0x0000_0000_2000;
    /// Invalid response status line.
    pub const STATUS_LINE_INVALID: u64 = 0x0000_0100_0000;
    /// Host in the URI is invalid.
    pub const HOSTU_INVALID: u64 = 0x0000_0200_0000;
    /// Host in the Host header is invalid.
    pub const HOSTH_INVALID: u64 = 0x0000_0400_0000;
    /// Host is invalid.
    pub const HOST_INVALID: u64 = (Self::HOSTU_INVALID | Self::HOSTH_INVALID);
    /// Request is invalid.
    pub const REQUEST_INVALID: u64 = 0x0001_0000_0000;
    /// Request content-length is invalid.
    pub const REQUEST_INVALID_C_L: u64 = 0x0002_0000_0000;
    /// Authorization is invalid.
    pub const AUTH_INVALID: u64 = 0x0004_0000_0000;
    /// The request line was terminated by a bare LF.
    pub const LF_LINE: u64 = 0x0008_0000_0000;
    /// The request line was terminated by CRLF.
    pub const CRLF_LINE: u64 = 0x0010_0000_0000;
}

/// Connection flags are 8 bits wide.
pub struct ConnectionFlags;

impl ConnectionFlags {
    /// Default, no flags raised.
    pub const UNKNOWN: u8 = 0x00;
    /// Seen pipelined requests.
    pub const PIPELINED: u8 = 0x01;
    /// Seen extra data after an HTTP/0.9 communication.
    pub const HTTP_0_9_EXTRA: u8 = 0x02;
}

/// Enumerates the possible origins of a file seen in parsed traffic.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HtpFileSource {
    /// File from a multipart/form-data payload.
    MULTIPART = 1,
    /// Body of a PUT request.
    PUT = 2,
}

/// Used to represent files that are seen during the processing of HTTP
/// traffic. Most commonly this refers to files seen in multipart payloads,
/// but PUT request bodies are treated as files as well.
#[derive(Debug)]
pub struct File {
    /// Where did this file come from?
    pub source: HtpFileSource,
    /// File name, as provided (e.g., in the Content-Disposition part header).
    pub filename: Option<Bstr>,
    /// File length so far.
    pub len: usize,
    /// The file used for external storage, if extraction is enabled.
    pub tmpfile: Option<NamedTempFile>,
}

impl File {
    /// Creates a new file of the given origin.
    pub fn new(source: HtpFileSource, filename: Option<Bstr>) -> File {
        File {
            source,
            filename,
            len: 0,
            tmpfile: None,
        }
    }

    /// Creates the backing temporary file in the given directory. The file
    /// is owner-readable only and is removed when the File is dropped.
    pub fn create(&mut self, tmp_dir: &str) -> Result<()> {
        self.tmpfile = Some(
            Builder::new()
                .prefix("htx-multipart-file-")
                .rand_bytes(6)
                .tempfile_in(tmp_dir)?,
        );
        Ok(())
    }

    /// Writes data to the backing temporary file, if one was created.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if let Some(tmpfile) = &mut self.tmpfile {
            tmpfile.write_all(data)?;
        }
        Ok(())
    }

    /// Updates the file length and invokes any file data callbacks.
    pub fn handle_file_data(&mut self, hook: &FileDataHook, data: Option<&[u8]>) -> Result<()> {
        self.len = self.len.wrapping_add(data.map(|d| d.len()).unwrap_or(0));
        let mut file_data = FileData::new(self, data);
        hook.run_all(&mut file_data)
    }
}

/// Represents a chunk of file data.
pub struct FileData<'a> {
    /// File information.
    pub file: &'a File,
    /// The data chunk, or None to signal the end of the file.
    pub data: Option<&'a [u8]>,
}

impl<'a> FileData<'a> {
    /// Wraps a file and one chunk of its content.
    pub fn new(file: &'a File, data: Option<&'a [u8]>) -> Self {
        FileData { file, data }
    }
}

/// Is the byte an HTTP separator character?
pub fn is_separator(c: u8) -> bool {
    // separators = "(" | ")" | "<" | ">" | "@"
    //            | "," | ";" | ":" | "\" | <">
    //            | "/" | "[" | "]" | "?" | "="
    //            | "{" | "}" | SP | HT
    matches!(
        c as char,
        '(' | ')'
            | '<'
            | '>'
            | '@'
            | ','
            | ';'
            | ':'
            | '\\'
            | '"'
            | '/'
            | '['
            | ']'
            | '?'
            | '='
            | '{'
            | '}'
            | ' '
            | '\t'
    )
}

/// Is the byte an HTTP token character?
pub fn is_token(c: u8) -> bool {
    // token = 1*<any CHAR except CTLs or separators>
    // CHAR  = <any US-ASCII character (octets 0 - 127)>
    (32..=126).contains(&c) && !is_separator(c)
}

/// Is the byte a white space character, in the permissive sense used by
/// the request line grammar (isspace())?
pub fn is_space(c: u8) -> bool {
    matches!(c as char, ' ' | '\t' | '\r' | '\n' | '\x0b' | '\x0c')
}

/// Is the byte linear white space (SP or HT)?
pub fn is_lws(c: u8) -> bool {
    matches!(c as char, ' ' | '\t')
}

/// Can the byte begin a folded header continuation line?
pub fn is_folding_char(c: u8) -> bool {
    is_lws(c) || c == 0
}

/// Determines if the given line is a continuation (of some previous line).
pub fn is_line_folded(data: &[u8]) -> bool {
    data.first().map(|c| is_folding_char(*c)).unwrap_or(false)
}

/// Is the given line empty (nothing but its line ending)?
pub fn is_line_empty(data: &[u8]) -> bool {
    matches!(data, b"\x0d" | b"\x0a" | b"\x0d\x0a")
}

/// Does the line consist entirely of whitespace characters?
pub fn is_line_whitespace(data: &[u8]) -> bool {
    !data.iter().any(|c| !is_space(*c))
}

/// Determines if the given line is a header block terminator.
pub fn is_line_terminator(
    server_personality: HtpServerPersonality,
    data: &[u8],
    next_no_lf: bool,
) -> bool {
    if server_personality == HtpServerPersonality::IIS_5_0 {
        // IIS 5 will accept a whitespace line as a terminator.
        if is_line_whitespace(data) {
            return true;
        }
    }
    // Treat an empty line as terminator.
    if is_line_empty(data) {
        return true;
    }
    if data.len() == 2 && nom_is_space(data[0]) && data[1] == b'\n' {
        return next_no_lf;
    }
    false
}

/// Determines if the given line can be ignored when it appears before a
/// request line.
pub fn is_line_ignorable(server_personality: HtpServerPersonality, data: &[u8]) -> bool {
    is_line_terminator(server_personality, data, false)
}

/// Removes all line terminators (LF, CR or CRLF) from the end of the line.
pub fn chomp(mut data: &[u8]) -> &[u8] {
    while let Some(last) = data.last() {
        if *last == b'\n' || *last == b'\r' {
            data = &data[..data.len() - 1];
        } else {
            break;
        }
    }
    data
}

/// Removes leading and trailing ascii whitespace.
pub fn trimmed(input: &[u8]) -> &[u8] {
    let first = input.iter().position(|c| !c.is_ascii_whitespace());
    let last = input.iter().rposition(|c| !c.is_ascii_whitespace());
    match (first, last) {
        (Some(first), Some(last)) => &input[first..=last],
        _ => b"",
    }
}

/// Take leading ascii whitespace.
pub fn take_ascii_whitespace<'a>() -> impl Fn(&'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    move |input| take_while(|c: u8| c.is_ascii_whitespace())(input)
}

/// Take leading space, in the permissive isspace() sense.
pub fn take_is_space(data: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(is_space)(data)
}

/// Take leading space as defined by nom (SP and HT only).
pub fn take_nom_is_space(data: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(nom_is_space)(data)
}

/// Take any non-space bytes, in the permissive isspace() sense.
pub fn take_not_is_space(data: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(|c: u8| !is_space(c))(data)
}

/// Returns all data up to and including the first LF byte. Incomplete if
/// no LF is present.
pub fn take_till_lf(data: &[u8]) -> IResult<&[u8], &[u8]> {
    let (_, line) = streaming_take_till(|c| c == b'\n')(data)?;
    let (remaining, line) = take(line.len() + 1)(data)?;
    Ok((remaining, line))
}

/// Returns all data up to, but not including, the first NUL byte.
/// Incomplete if no NUL is present.
pub fn take_until_null(data: &[u8]) -> IResult<&[u8], &[u8]> {
    streaming_take_till(|c| c == b'\0')(data)
}

/// Skips to the first occurrence of the tag, matched case insensitively.
/// Does not consume the tag.
pub fn take_until_no_case(tag: &[u8]) -> impl Fn(&[u8]) -> IResult<&[u8], &[u8]> + '_ {
    move |input| {
        if tag.is_empty() {
            return Ok((b"", input));
        }
        let mut pos = 0;
        while pos < input.len() {
            if tag_no_case::<_, _, (&[u8], nom::error::ErrorKind)>(tag)(&input[pos..]).is_ok() {
                return Ok((&input[pos..], &input[..pos]));
            }
            pos += 1;
        }
        Ok((b"", input))
    }
}

/// Extracts the next run of ascii digits from the input, parsing over
/// surrounding SP/HT. Returns (trailing data, (leading non-digit bytes,
/// the digits)).
pub fn ascii_digits<'a>() -> impl Fn(&'a [u8]) -> IResult<&'a [u8], (&'a [u8], &'a [u8])> {
    move |input| {
        map(
            tuple((
                take_nom_is_space,
                take_till(|c: u8| c.is_ascii_digit()),
                take_while1(|c: u8| c.is_ascii_digit()),
                take_nom_is_space,
            )),
            |(_, leading_data, digits, _)| (leading_data, digits),
        )(input)
    }
}

/// Extracts the next run of hex digits from the input, parsing over
/// surrounding SP/HT.
pub fn hex_digits<'a>() -> impl Fn(&'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    move |input| {
        map(
            tuple((
                take_nom_is_space,
                take_while1(|c: u8| c.is_ascii_hexdigit()),
                take_nom_is_space,
            )),
            |(_, digits, _)| digits,
        )(input)
    }
}

/// Determines if the bytes seen so far could still be the start of a valid
/// chunk length line (whitespace followed by hex digits).
pub fn is_valid_chunked_length_data(data: &[u8]) -> bool {
    tuple((
        take_nom_is_space,
        take_while1::<_, _, nom::error::Error<&[u8]>>(|c: u8| c.is_ascii_hexdigit()),
    ))(data)
    .is_ok()
}

/// Attempts to convert the provided port slice to a u16. None if the
/// conversion fails or the result is 0.
pub fn convert_port(port: &[u8]) -> Option<u16> {
    if port.is_empty() {
        return None;
    }
    std::str::from_utf8(port)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|p| *p != 0)
}

/// Returns true if the input looks like a syntactically valid hostname,
/// including IPv6 literals in brackets. A single trailing dot is accepted.
pub fn validate_hostname(input: &[u8]) -> bool {
    if input.is_empty() || input.len() > 255 {
        return false;
    }
    if input.starts_with(b"[") {
        return input.len() > 2
            && input.ends_with(b"]")
            && input[1..input.len() - 1]
                .iter()
                .all(|c| c.is_ascii_hexdigit() || *c == b':' || *c == b'.');
    }
    let host = if input.ends_with(b".") {
        &input[..input.len() - 1]
    } else {
        input
    };
    if host.is_empty() {
        return false;
    }
    host.split(|c| *c == b'.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .iter()
                .all(|c| c.is_ascii_alphanumeric() || *c == b'-' || *c == b'_')
    })
}

/// Determines whether an outbound line is best treated as response body.
/// If it does not begin like a status line ("HTTP", permitting leading
/// whitespace), browsers display it as content, and so do we.
pub fn treat_response_line_as_body(data: &[u8]) -> bool {
    let (rest, _) =
        take_while::<_, _, (&[u8], nom::error::ErrorKind)>(|c: u8| c == 0 || is_space(c))(data)
            .unwrap_or((data, b""));
    !rest.starts_with(b"HTTP")
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn token_chars() {
        assert!(is_token(b'a'));
        assert!(is_token(b'!'));
        assert!(!is_token(b' '));
        assert!(!is_token(b':'));
        assert!(!is_token(0x7f));
        assert!(!is_token(0x1f));
    }

    #[test]
    fn chomp_line_endings() {
        assert_eq!(chomp(b"test\r\n"), b"test");
        assert_eq!(chomp(b"test\n\n\r"), b"test");
        assert_eq!(chomp(b"test"), b"test");
        assert_eq!(chomp(b"\r\n"), b"");
    }

    #[test]
    fn till_lf() {
        let (remaining, line) = take_till_lf(b"hello\nworld").unwrap();
        assert_eq!(line, b"hello\n");
        assert_eq!(remaining, b"world");
        assert!(take_till_lf(b"no newline").is_err());
    }

    #[test]
    fn until_no_case() {
        let (remaining, consumed) = take_until_no_case(b"boundary")(b"xxBoUnDaRy=12").unwrap();
        assert_eq!(consumed, b"xx");
        assert_eq!(remaining, b"BoUnDaRy=12");
        let (remaining, consumed) = take_until_no_case(b"boundary")(b"none here").unwrap();
        assert_eq!(consumed, b"none here");
        assert_eq!(remaining, b"");
    }

    #[rstest]
    #[case(b"80", Some(80))]
    #[case(b"0", None)]
    #[case(b"65536", None)]
    #[case(b"", None)]
    #[case(b"8a", None)]
    fn ports(#[case] input: &[u8], #[case] expected: Option<u16>) {
        assert_eq!(convert_port(input), expected);
    }

    #[rstest]
    #[case(b"www.example.com", true)]
    #[case(b"www.example.com.", true)]
    #[case(b"www example com", false)]
    #[case(b"", false)]
    #[case(b"[::1]", true)]
    #[case(b"[::1]x", false)]
    #[case(b"a..b", false)]
    fn hostnames(#[case] input: &[u8], #[case] expected: bool) {
        assert_eq!(validate_hostname(input), expected);
    }

    #[test]
    fn response_line_heuristic() {
        assert!(!treat_response_line_as_body(b"HTTP/1.1 200 OK"));
        assert!(!treat_response_line_as_body(b"  HTTP/1.1 200 OK"));
        assert!(treat_response_line_as_body(b"<html>"));
        assert!(treat_response_line_as_body(b"HTT"));
    }
}
