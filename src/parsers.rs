use crate::{
    bstr::Bstr,
    error::Result,
    log::Logger,
    table::Table,
    transaction::{HtpAuthType, HtpProtocol, HtpResponseNumber, Transaction},
    util::{
        ascii_digits, chomp, hex_digits, is_lws, is_token, take_ascii_whitespace,
        take_nom_is_space, trimmed, FlagOperations,
    },
    HtpStatus,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_until, take_while},
    combinator::map,
    sequence::tuple,
    IResult,
};

/// Flags raised while parsing a single header line. These describe the
/// shape of the line itself; the caller translates them into transaction
/// and field flags.
pub struct HeaderFlags;

impl HeaderFlags {
    /// No colon was found; the whole line becomes the value.
    pub const MISSING_COLON: u64 = 0x0001;
    /// The name before the colon was empty.
    pub const NAME_EMPTY: u64 = 0x0002;
    /// The name carried trailing whitespace.
    pub const NAME_TRAILING_WHITESPACE: u64 = 0x0004;
    /// The name contains bytes that are not RFC 2616 tokens.
    pub const NAME_NON_TOKEN_CHARS: u64 = 0x0008;
    /// The value contains a raw NUL byte.
    pub const VALUE_CONTAINS_NUL: u64 = 0x0010;
}

/// One parsed header line.
#[derive(Clone, Debug)]
pub struct ParsedHeader {
    /// Header name, possibly empty.
    pub name: Bstr,
    /// Header value.
    pub value: Bstr,
    /// HeaderFlags observations about the line.
    pub flags: u64,
}

/// Parses one logical header line (folding already applied) into name,
/// value, and anomaly flags. This parser never fails; a malformed line
/// is returned with the appropriate flags so that inspection continues.
pub fn parse_header_line(line: &[u8]) -> ParsedHeader {
    let data = chomp(line);
    let mut flags: u64 = 0;

    let (name, value) = match data.iter().position(|&c| c == b':') {
        None => {
            // Header line without a colon; treat as a header with an
            // empty name so the content remains visible downstream.
            flags.set(HeaderFlags::MISSING_COLON);
            (&b""[..], data)
        }
        Some(0) => {
            flags.set(HeaderFlags::NAME_EMPTY);
            (&b""[..], &data[1..])
        }
        Some(colon) => (&data[..colon], &data[colon + 1..]),
    };

    let mut name_end = name.len();
    while name_end > 0 && name[name_end - 1] <= 0x20 {
        name_end -= 1;
        flags.set(HeaderFlags::NAME_TRAILING_WHITESPACE);
    }
    let name = &name[..name_end];
    if name.is_empty() && !flags.is_set(HeaderFlags::MISSING_COLON) {
        flags.set(HeaderFlags::NAME_EMPTY);
    }
    if name.iter().any(|&c| !is_token(c)) {
        flags.set(HeaderFlags::NAME_NON_TOKEN_CHARS);
    }

    // Ignore LWS before the field content.
    let mut value_start = 0;
    while value_start < value.len() && is_lws(value[value_start]) {
        value_start += 1;
    }
    let value = &value[value_start..];
    if value.contains(&0) {
        flags.set(HeaderFlags::VALUE_CONTAINS_NUL);
    }

    ParsedHeader {
        name: Bstr::from(name),
        value: Bstr::from(value),
        flags,
    }
}

/// Extracts the MIME type from a Content-Type header value: leading
/// whitespace skipped, terminated at the first ';', ',' or space.
fn content_type(input: &[u8]) -> IResult<&[u8], &[u8]> {
    map(
        tuple((take_ascii_whitespace(), is_not(";, \t"))),
        |(_, content_type)| content_type,
    )(input)
}

/// Parses a Content-Type header value into its lowercased MIME type,
/// parameters stripped.
pub fn parse_content_type(header: &[u8]) -> Result<Bstr> {
    if let Ok((_, content_type)) = content_type(header) {
        let mut ct = Bstr::from(content_type);
        ct.make_ascii_lowercase();
        Ok(ct)
    } else {
        Err(HtpStatus::ERROR)
    }
}

/// Parses a Content-Length value: a non-negative decimal number, with
/// whitespace permitted before and after. Anything else around the number
/// is reported through the logger but the number is still used.
///
/// Returns the length, or None if no usable number was found.
pub fn parse_content_length(input: &[u8], logger: Option<&Logger>) -> Option<i64> {
    let (trailing_data, (leading_data, content_length)) = ascii_digits()(input).ok()?;
    if leading_data.contains(&b'-') || leading_data.contains(&b'+') {
        // A signed value is not a length.
        return None;
    }
    if let Some(logger) = logger {
        if !leading_data.is_empty() {
            // Contains invalid characters, but still attempt to process.
            htp_warn!(
                logger,
                HtpLogCode::CONTENT_LENGTH_EXTRA_DATA_START,
                "C-L value with extra data in the beginning"
            );
        }
        if !trailing_data.is_empty() {
            htp_warn!(
                logger,
                HtpLogCode::CONTENT_LENGTH_EXTRA_DATA_END,
                "C-L value with extra data in the end"
            );
        }
    }
    std::str::from_utf8(content_length)
        .ok()?
        .parse::<i64>()
        .ok()
}

/// Parses a chunk length line: hexadecimal digits with optional
/// surrounding whitespace and an optional ";extension" suffix.
///
/// Returns (length, extension_present) or an error when the line is not
/// a chunk length at all.
pub fn parse_chunked_length(input: &[u8]) -> std::result::Result<(u64, bool), &'static str> {
    let data = chomp(input);
    let (data, extension) = match data.iter().position(|&c| c == b';') {
        Some(pos) => (&data[..pos], true),
        None => (data, false),
    };
    if let Ok((trailing_data, digits)) = hex_digits()(data) {
        if trailing_data.is_empty() && !digits.is_empty() {
            if let Ok(chunked_length) = u64::from_str_radix(
                std::str::from_utf8(digits).map_err(|_| "Invalid chunk length")?,
                16,
            ) {
                return Ok((chunked_length, extension));
            }
        }
    }
    Err("Invalid chunk length")
}

/// Extracts the version token of an "HTTP/X.Y" protocol string,
/// tolerating whitespace around the slash and leading zeros.
fn protocol_version(input: &[u8]) -> IResult<&[u8], (&[u8], bool)> {
    let (remaining, (_, _, leading, _, trailing, version, _)) = tuple((
        take_ascii_whitespace(),
        tag_no_case("HTTP"),
        take_ascii_whitespace(),
        tag("/"),
        take_while(|c: u8| c.is_ascii_whitespace() || c == b'0'),
        alt((tag(".9"), tag("1.0"), tag("1.1"))),
        take_ascii_whitespace(),
    ))(input)?;
    Ok((
        remaining,
        (version, !leading.is_empty() || !trailing.is_empty()),
    ))
}

/// Determines the protocol number from a textual representation such as
/// "HTTP/1.1". Whitespace around the forward slash and leading zeros are
/// accepted but logged.
pub fn parse_protocol(input: &[u8], logger: &Logger) -> HtpProtocol {
    if let Ok((remaining, (version, contains_extra))) = protocol_version(input) {
        if !remaining.is_empty() {
            return HtpProtocol::INVALID;
        }
        if contains_extra {
            htp_warn!(
                logger,
                HtpLogCode::PROTOCOL_CONTAINS_EXTRA_DATA,
                "Protocol version contains leading and/or trailing whitespace and/or leading zeros"
            );
        }
        match version {
            b".9" => HtpProtocol::V0_9,
            b"1.0" => HtpProtocol::V1_0,
            b"1.1" => HtpProtocol::V1_1,
            _ => HtpProtocol::INVALID,
        }
    } else {
        HtpProtocol::INVALID
    }
}

/// Determines the numerical value of a response status as a string.
/// Valid status codes lie in 100..=999.
pub fn parse_status(status: &[u8]) -> HtpResponseNumber {
    if let Ok((trailing_data, (leading_data, status_code))) = ascii_digits()(status) {
        if !trailing_data.is_empty() || !leading_data.is_empty() {
            return HtpResponseNumber::INVALID;
        }
        if let Ok(status_code) = std::str::from_utf8(status_code)
            .unwrap_or("")
            .parse::<u16>()
        {
            if (100..=999).contains(&status_code) {
                return HtpResponseNumber::VALID(status_code);
            }
        }
    }
    HtpResponseNumber::INVALID
}

/// Parses a Digest Authorization header value, extracting the username.
fn parse_authorization_digest(auth_header_value: &[u8]) -> IResult<&[u8], Vec<u8>> {
    // Find the username field; the value must be a quoted string.
    let (mut remaining_input, _) = tuple((
        take_until("username="),
        tag("username="),
        take_nom_is_space,
        tag("\""),
    ))(auth_header_value)?;
    let mut result = Vec::new();
    // Unescape any escaped double quotes and find the closing quote.
    loop {
        let (remaining, (auth_header, _)) = tuple((take_until("\""), tag("\"")))(remaining_input)?;
        remaining_input = remaining;
        result.extend_from_slice(auth_header);
        if result.last() == Some(&b'\\') {
            // Escaped quote; keep the quote, drop the escape.
            result.pop();
            result.push(b'"');
        } else {
            break;
        }
    }
    Ok((remaining_input, result))
}

/// Parses a Basic Authorization header value into username and password.
fn parse_authorization_basic(tx: &mut Transaction, auth_header_value: &[u8]) -> Result<()> {
    // Skip 'Basic<lws>'.
    if auth_header_value.len() <= 5 {
        return Err(HtpStatus::DECLINED);
    }
    let value_start = auth_header_value[5..]
        .iter()
        .position(|&c| !c.is_ascii_whitespace())
        .map(|pos| pos + 5)
        .ok_or(HtpStatus::DECLINED)?;
    // Decode base64-encoded data.
    let decoded = BASE64
        .decode(&auth_header_value[value_start..])
        .map_err(|_| HtpStatus::DECLINED)?;
    // Extract the username and the password.
    let i = decoded
        .iter()
        .position(|&c| c == b':')
        .ok_or(HtpStatus::DECLINED)?;
    let (username, password) = decoded.split_at(i);
    tx.request_auth_username = Some(Bstr::from(username));
    tx.request_auth_password = Some(Bstr::from(&password[1..]));
    Ok(())
}

/// Parses the Authorization request header, if present.
pub fn parse_authorization(tx: &mut Transaction) -> Result<()> {
    let auth_header = if let Some((_, auth_header)) =
        tx.request_headers.get_nocase_nozero("authorization")
    {
        auth_header.value.clone()
    } else {
        tx.request_auth_type = HtpAuthType::NONE;
        return Ok(());
    };
    if auth_header.starts_with_nocase("basic") {
        tx.request_auth_type = HtpAuthType::BASIC;
        return parse_authorization_basic(tx, auth_header.as_slice());
    } else if auth_header.starts_with_nocase("digest") {
        tx.request_auth_type = HtpAuthType::DIGEST;
        if let Ok((_, auth_username)) = parse_authorization_digest(auth_header.as_slice()) {
            tx.request_auth_username = Some(Bstr::from(auth_username));
            return Ok(());
        }
        return Err(HtpStatus::DECLINED);
    }
    // Unrecognized authentication method.
    tx.request_auth_type = HtpAuthType::UNRECOGNIZED;
    Ok(())
}

/// Parses a single v0 request cookie into its name and value.
pub fn single_cookie_v0(data: &[u8]) -> (&[u8], &[u8]) {
    match data.iter().position(|&c| c == b'=') {
        Some(pos) => (&data[..pos], &data[pos + 1..]),
        None => (data, b""),
    }
}

/// Parses the Cookie request header in v0 format into
/// tx.request_cookies. Nameless cookies are dropped.
pub fn parse_cookies_v0(tx: &mut Transaction) -> Result<()> {
    if let Some((_, cookie_header)) = tx.request_headers.get_nocase_nozero("cookie") {
        let data: &[u8] = cookie_header.value.as_slice();
        let mut cookies = Table::with_capacity(4);
        for cookie in data.split(|b| *b == b';') {
            let cookie = trimmed(cookie);
            if cookie.is_empty() {
                continue;
            }
            let (name, value) = single_cookie_v0(cookie);
            if !name.is_empty() {
                cookies.add(Bstr::from(name), Bstr::from(value));
            }
        }
        tx.request_cookies = cookies;
    }
    Ok(())
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"134", Some(134))]
    #[case(b"    134    ", Some(134))]
    #[case(b"abcd134", Some(134))]
    #[case(b"-134", None)]
    #[case(b"abcd", None)]
    #[case(b"", None)]
    fn content_length_values(#[case] input: &[u8], #[case] expected: Option<i64>) {
        assert_eq!(parse_content_length(input, None), expected);
    }

    #[rstest]
    #[case(b"5\r\n", Ok((5, false)))]
    #[case(b"a\r\n", Ok((10, false)))]
    #[case(b"AbC\r\n", Ok((2748, false)))]
    #[case(b"5;ext=1\r\n", Ok((5, true)))]
    #[case(b"5 5\r\n", Err("Invalid chunk length"))]
    #[case(b"-5\r\n", Err("Invalid chunk length"))]
    #[case(b"\r\n", Err("Invalid chunk length"))]
    fn chunked_lengths(
        #[case] input: &[u8],
        #[case] expected: std::result::Result<(u64, bool), &'static str>,
    ) {
        assert_eq!(parse_chunked_length(input), expected);
    }

    #[test]
    fn header_lines() {
        let h = parse_header_line(b"Host: www.example.com\r\n");
        assert_eq!(h.name, "Host");
        assert_eq!(h.value, "www.example.com");
        assert_eq!(h.flags, 0);

        let h = parse_header_line(b"Host:www.example.com\n");
        assert_eq!(h.value, "www.example.com");

        let h = parse_header_line(b"NoColonHere\r\n");
        assert!(h.flags.is_set(HeaderFlags::MISSING_COLON));
        assert_eq!(h.name, "");
        assert_eq!(h.value, "NoColonHere");

        let h = parse_header_line(b": no name\r\n");
        assert!(h.flags.is_set(HeaderFlags::NAME_EMPTY));

        let h = parse_header_line(b"Name with space: 4\r\n");
        assert!(h.flags.is_set(HeaderFlags::NAME_NON_TOKEN_CHARS));

        let h = parse_header_line(b"Lws : 9\r\n");
        assert!(h.flags.is_set(HeaderFlags::NAME_TRAILING_WHITESPACE));
        assert_eq!(h.name, "Lws");
        assert_eq!(h.value, "9");
    }

    #[test]
    fn content_types() {
        assert_eq!(
            parse_content_type(b"multipart/form-data; boundary=X").unwrap(),
            "multipart/form-data"
        );
        assert_eq!(parse_content_type(b"  TEXT/HTML").unwrap(), "text/html");
    }

    #[test]
    fn status_codes() {
        assert_eq!(parse_status(b"200"), HtpResponseNumber::VALID(200));
        assert_eq!(parse_status(b"  404 "), HtpResponseNumber::VALID(404));
        assert_eq!(parse_status(b"999"), HtpResponseNumber::VALID(999));
        assert_eq!(parse_status(b"99"), HtpResponseNumber::INVALID);
        assert_eq!(parse_status(b"1000"), HtpResponseNumber::INVALID);
        assert_eq!(parse_status(b"20x"), HtpResponseNumber::INVALID);
    }

    #[test]
    fn cookies() {
        assert_eq!(
            single_cookie_v0(b"yummy_cookie=choco"),
            (&b"yummy_cookie"[..], &b"choco"[..])
        );
        assert_eq!(single_cookie_v0(b"=choco"), (&b""[..], &b"choco"[..]));
        assert_eq!(
            single_cookie_v0(b"yummy_cookie="),
            (&b"yummy_cookie"[..], &b""[..])
        );
        assert_eq!(single_cookie_v0(b""), (&b""[..], &b""[..]));
    }

    #[test]
    fn auth_digest_username() {
        assert_eq!(
            b"ivan\"r\"".to_vec(),
            parse_authorization_digest(b"   username=   \"ivan\\\"r\\\"\"")
                .unwrap()
                .1
        );
        assert_eq!(
            b"ivanr".to_vec(),
            parse_authorization_digest(b"username=\"ivanr\"   ")
                .unwrap()
                .1
        );
        assert!(parse_authorization_digest(b"username=ivanr\"   ").is_err());
        assert!(parse_authorization_digest(b"username=\"ivanr   ").is_err());
    }
}
