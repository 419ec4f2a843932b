use crate::{
    bstr::Bstr,
    connection_parser::{ConnectionParser, HtpStreamState, State},
    error::Result,
    hook::DataHook,
    parsers::{
        parse_authorization, parse_chunked_length, parse_content_length, parse_content_type,
        parse_cookies_v0, parse_header_line, parse_protocol, HeaderFlags,
    },
    transaction::{
        Data, Header, HtpProtocol, HtpRequestProgress, HtpResponseProgress, HtpTransferCoding,
    },
    uri::{parse_hostport, parse_uri},
    util::{
        chomp, is_folding_char, is_line_folded, is_line_ignorable, is_line_terminator, is_space,
        take_ascii_whitespace, take_is_space, take_not_is_space, take_till_lf, trimmed,
        ConnectionFlags, File, FlagOperations, HtpFileSource, HtpFlags,
    },
    HtpStatus,
};
use nom::{bytes::complete::take_until, character::complete::char, sequence::tuple};
use std::cmp::Ordering;
use std::io::{Cursor, Seek, SeekFrom};
use time::OffsetDateTime;

/// HTTP methods.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(non_camel_case_types, missing_docs)]
pub enum HtpMethod {
    /// Used by default, until the method is determined (e.g., before
    /// the request line is processed).
    UNKNOWN,
    HEAD,
    GET,
    PUT,
    POST,
    DELETE,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
    PROPFIND,
    PROPPATCH,
    MKCOL,
    COPY,
    MOVE,
    LOCK,
    UNLOCK,
    VERSION_CONTROL,
    CHECKOUT,
    UNCHECKOUT,
    CHECKIN,
    UPDATE,
    LABEL,
    REPORT,
    MKWORKSPACE,
    MKACTIVITY,
    BASELINE_CONTROL,
    MERGE,
    INVALID,
}

/// Converts a request method string into a method number.
pub fn convert_to_method(method: &[u8]) -> HtpMethod {
    match method {
        b"GET" => HtpMethod::GET,
        b"PUT" => HtpMethod::PUT,
        b"POST" => HtpMethod::POST,
        b"DELETE" => HtpMethod::DELETE,
        b"CONNECT" => HtpMethod::CONNECT,
        b"OPTIONS" => HtpMethod::OPTIONS,
        b"TRACE" => HtpMethod::TRACE,
        b"PATCH" => HtpMethod::PATCH,
        b"PROPFIND" => HtpMethod::PROPFIND,
        b"PROPPATCH" => HtpMethod::PROPPATCH,
        b"MKCOL" => HtpMethod::MKCOL,
        b"COPY" => HtpMethod::COPY,
        b"MOVE" => HtpMethod::MOVE,
        b"LOCK" => HtpMethod::LOCK,
        b"UNLOCK" => HtpMethod::UNLOCK,
        b"VERSION-CONTROL" => HtpMethod::VERSION_CONTROL,
        b"CHECKOUT" => HtpMethod::CHECKOUT,
        b"UNCHECKOUT" => HtpMethod::UNCHECKOUT,
        b"CHECKIN" => HtpMethod::CHECKIN,
        b"UPDATE" => HtpMethod::UPDATE,
        b"LABEL" => HtpMethod::LABEL,
        b"REPORT" => HtpMethod::REPORT,
        b"MKWORKSPACE" => HtpMethod::MKWORKSPACE,
        b"MKACTIVITY" => HtpMethod::MKACTIVITY,
        b"BASELINE-CONTROL" => HtpMethod::BASELINE_CONTROL,
        b"MERGE" => HtpMethod::MERGE,
        b"INVALID" => HtpMethod::INVALID,
        b"HEAD" => HtpMethod::HEAD,
        _ => HtpMethod::UNKNOWN,
    }
}

impl ConnectionParser {
    /// Sends outstanding raw connection data to the active data receiver
    /// hook.
    fn request_receiver_send_data(&mut self, is_last: bool) -> Result<()> {
        let hook = match &self.request_data_receiver_hook {
            Some(hook) => hook.clone(),
            None => return Ok(()),
        };
        let start = self.request_current_receiver_offset as usize;
        let end = self.request_curr_data.position() as usize;
        if end > start {
            let index = self.request_tx_index().ok_or(HtpStatus::ERROR)?;
            let raw = &self.request_curr_data.get_ref()[start..end];
            let tx = self.conn.tx_mut(index).ok_or(HtpStatus::ERROR)?;
            hook.run_all(&mut Data::new(tx, Some(raw), is_last))?;
        }
        self.request_current_receiver_offset = self.request_curr_data.position();
        Ok(())
    }

    /// Configures the data receiver hook. If there is a previous hook, it
    /// will be finalized and cleared.
    fn request_receiver_set(&mut self, data_receiver_hook: Option<DataHook>) -> Result<()> {
        // Ignore result.
        let _ = self.request_receiver_finalize_clear();
        self.request_data_receiver_hook = data_receiver_hook;
        self.request_current_receiver_offset = self.request_curr_data.position();
        Ok(())
    }

    /// Finalizes the active data receiver hook by sending any outstanding
    /// data to it. The hook is then removed so that it receives no more
    /// data.
    pub fn request_receiver_finalize_clear(&mut self) -> Result<()> {
        if self.request_data_receiver_hook.is_none() {
            return Ok(());
        }
        let rc = self.request_receiver_send_data(true);
        self.request_data_receiver_hook = None;
        rc
    }

    /// Handles request parser state changes, configuring data receivers
    /// as header and trailer parsing begins.
    fn request_handle_state_change(&mut self) -> Result<()> {
        if self.request_state_previous == self.request_state {
            return Ok(());
        }
        if self.request_state == State::HEADERS {
            let header_fn = Some(self.cfg.hook_request_header_data.clone());
            let trailer_fn = Some(self.cfg.hook_request_trailer_data.clone());
            match self.request_mut_ok()?.request_progress {
                HtpRequestProgress::HEADERS => self.request_receiver_set(header_fn),
                HtpRequestProgress::TRAILER => self.request_receiver_set(trailer_fn),
                _ => Ok(()),
            }?;
        }
        self.request_state_previous = self.request_state;
        Ok(())
    }

    /// Enforces the buffering limit when a line must be kept across input
    /// chunks. The pending folded-header buffer counts against the limit.
    fn check_request_buffer_limit(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut newlen = self.request_buf.len().wrapping_add(len);
        if let Some(header) = &self.request_header {
            newlen = newlen.wrapping_add(header.len())
        }
        if newlen > self.cfg.field_limit {
            htp_error!(
                self.logger,
                HtpLogCode::REQUEST_FIELD_TOO_LONG,
                format!(
                    "Request buffer over the limit: size {} limit {}.",
                    newlen, self.cfg.field_limit
                )
            );
            return Err(HtpStatus::ERROR);
        }
        Ok(())
    }

    /// Buffers the unconsumed tail of the current chunk for the next
    /// invocation, consuming the chunk.
    pub fn handle_request_absent_lf(&mut self, data: &[u8]) -> Result<()> {
        self.request_curr_data.seek(SeekFrom::End(0))?;
        self.check_request_buffer_limit(data.len())?;
        self.request_buf.add(data);
        Err(HtpStatus::DATA_BUFFER)
    }

    /// The idle state: if at least one byte is available a new
    /// transaction is started.
    pub fn request_idle(&mut self) -> Result<()> {
        if self.request_curr_data.position() >= self.request_curr_data.get_ref().len() as u64 {
            return Err(HtpStatus::DATA);
        }
        self.create_tx()?;
        self.state_request_start()
    }

    /// Parses the request line state: consume bytes until LF.
    pub fn request_line(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.request_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.request_line_complete(line)
            }
            _ => {
                if self.request_status == HtpStreamState::CLOSED {
                    self.request_curr_data.seek(SeekFrom::End(0))?;
                    self.request_line_complete(data)
                } else {
                    self.handle_request_absent_lf(data)
                }
            }
        }
    }

    /// Processes one complete request line.
    fn request_line_complete(&mut self, line: &[u8]) -> Result<()> {
        self.check_request_buffer_limit(line.len())?;
        let mut data = std::mem::take(&mut self.request_buf);
        data.add(line);
        if data.is_empty() {
            return Err(HtpStatus::DATA);
        }
        // Is this a line that should be ignored?
        if is_line_ignorable(self.cfg.server_personality, &data) {
            // We have an empty/whitespace line, which we'll note, ignore
            // and move on.
            let tx = self.request_mut_ok()?;
            tx.request_ignored_lines = tx.request_ignored_lines.wrapping_add(1);
            return Ok(());
        }
        // Note how the line was terminated.
        {
            let tx = self.request_mut_ok()?;
            if data.as_slice().ends_with(b"\r\n") {
                tx.flags.set(HtpFlags::CRLF_LINE);
            } else if data.as_slice().ends_with(b"\n") {
                tx.flags.set(HtpFlags::LF_LINE);
            }
        }
        let data = chomp(data.as_slice());
        self.parse_request_line(data)?;
        self.state_request_line()?;
        Ok(())
    }

    /// Splits a request line into method, URI and protocol, tolerating
    /// the delimiter variations that servers accept.
    pub fn parse_request_line(&mut self, request_line: &[u8]) -> Result<()> {
        let tx = self.request_mut_ok()?;
        tx.request_line = Some(Bstr::from(request_line));
        tx.request_progress = HtpRequestProgress::LINE;

        // The request method starts at the beginning of the line and
        // ends with the first whitespace character. Leading whitespace
        // is skipped, as IIS allows it.
        let mut method_parser = tuple::<_, _, nom::error::Error<&[u8]>, _>((
            take_is_space,
            take_not_is_space,
            // The RFC allows for only one SP, but then suggests any
            // number of SP and HT should be permitted. Servers use
            // isspace(), which is even more permissive.
            take_ascii_whitespace(),
        ));
        if let Ok((remaining, (leading, method, ws))) = method_parser(request_line) {
            if !leading.is_empty() {
                htp_warn!(
                    tx.logger,
                    HtpLogCode::REQUEST_LINE_LEADING_WHITESPACE,
                    "Request line: leading whitespace"
                );
            }
            tx.request_method = Some(Bstr::from(method));
            tx.request_method_number = convert_to_method(method);
            if ws.iter().any(|&c| c != 0x20) {
                htp_warn!(
                    tx.logger,
                    HtpLogCode::METHOD_DELIM_NON_COMPLIANT,
                    "Request line: non-compliant delimiter between method and URI"
                );
            }
            if remaining.is_empty() {
                // No URI and no protocol; a short-form request.
                tx.is_protocol_0_9 = true;
                tx.request_protocol_number = HtpProtocol::V0_9;
                if tx.request_method_number == HtpMethod::UNKNOWN {
                    htp_warn!(
                        tx.logger,
                        HtpLogCode::REQUEST_LINE_UNKNOWN_METHOD,
                        "Request line: unknown method only"
                    );
                }
                return Ok(());
            }
            // The URI ends with the first SP byte.
            let mut uri_parser = tuple::<_, _, nom::error::Error<&[u8]>, _>((
                nom::bytes::complete::take_while(|c: u8| c != 0x20),
                take_is_space,
            ));
            if let Ok((mut protocol, (mut uri, _))) = uri_parser(remaining) {
                if uri.len() == remaining.len() && uri.iter().any(|&c| is_space(c)) {
                    // The URI contains non-SP whitespace; retry using the
                    // permissive delimiter set.
                    htp_warn!(
                        tx.logger,
                        HtpLogCode::URI_DELIM_NON_COMPLIANT,
                        "Request line: URI contains non-compliant delimiter"
                    );
                    if let Ok((protocol2, (uri2, _))) =
                        tuple::<_, _, nom::error::Error<&[u8]>, _>((take_not_is_space, take_is_space))(
                            remaining,
                        )
                    {
                        uri = uri2;
                        protocol = protocol2;
                    }
                }
                tx.request_uri = Some(Bstr::from(uri));
                if protocol.is_empty() {
                    // URI but no protocol; short form again.
                    tx.is_protocol_0_9 = true;
                    tx.request_protocol_number = HtpProtocol::V0_9;
                    if tx.request_method_number == HtpMethod::UNKNOWN {
                        htp_warn!(
                            tx.logger,
                            HtpLogCode::REQUEST_LINE_UNKNOWN_METHOD_NO_PROTOCOL,
                            "Request line: unknown method and no protocol"
                        );
                    }
                } else {
                    // The protocol information continues until the end of
                    // the line.
                    tx.request_protocol = Some(Bstr::from(protocol));
                    tx.request_protocol_number = parse_protocol(protocol, &tx.logger);
                    if tx.request_method_number == HtpMethod::UNKNOWN
                        && tx.request_protocol_number == HtpProtocol::INVALID
                    {
                        htp_warn!(
                            tx.logger,
                            HtpLogCode::REQUEST_LINE_UNKNOWN_METHOD_INVALID_PROTOCOL,
                            "Request line: unknown method and invalid protocol"
                        );
                    }
                }
            }
        }
        self.process_request_uri()
    }

    /// Splits the request URI and derives the URI-carried hostname, when
    /// there is one. CONNECT requests carry an authority instead of a
    /// URI proper.
    fn process_request_uri(&mut self) -> Result<()> {
        let tx = self.request_mut_ok()?;
        let uri = match tx.request_uri.clone() {
            Some(uri) => uri,
            None => return Ok(()),
        };
        if tx.request_method_number == HtpMethod::CONNECT {
            if let Ok((_, (host, port, valid))) = parse_hostport(uri.as_slice()) {
                if !valid {
                    tx.flags.set(HtpFlags::HOSTU_INVALID);
                    htp_warn!(
                        tx.logger,
                        HtpLogCode::HOSTNAME_INVALID,
                        "Request line: invalid authority"
                    );
                }
                let mut hostname = Bstr::from(host);
                hostname.make_ascii_lowercase();
                tx.request_hostname = Some(hostname);
                tx.request_port_number = port.and_then(|(_, port_nr)| port_nr);
            }
        } else {
            let parsed = parse_uri(uri.as_slice());
            if let Some(hostname) = parsed.normalized_hostname() {
                tx.request_hostname = Some(hostname);
                tx.request_port_number = parsed.port_number;
            }
            tx.parsed_uri = Some(parsed);
        }
        Ok(())
    }

    /// Decides between header parsing and the HTTP/0.9 shortcut.
    pub fn request_protocol(&mut self, data: &[u8]) -> Result<()> {
        if !self.request_mut_ok()?.is_protocol_0_9 {
            // Switch to request header parsing.
            self.request_state = State::HEADERS;
            self.request_mut_ok()?.request_progress = HtpRequestProgress::HEADERS;
            return Ok(());
        }
        // The protocol was missing from the request line; if the data
        // that follows looks like a header line the protocol was simply
        // omitted, and we parse headers after all.
        let mut parser = tuple::<_, _, nom::error::Error<&[u8]>, _>((take_until::<_, &[u8], _>(":"), char(':')));
        match parser(data) {
            Ok(_) => {
                htp_warn!(
                    self.logger,
                    HtpLogCode::REQUEST_LINE_NO_PROTOCOL,
                    "Request line: missing protocol"
                );
                let tx = self.request_mut_ok()?;
                tx.is_protocol_0_9 = false;
                tx.request_progress = HtpRequestProgress::HEADERS;
                self.request_state = State::HEADERS;
                Ok(())
            }
            Err(_) => {
                // A real short-form request; it has no headers and no
                // body, so it is done.
                self.request_state = State::FINALIZE;
                Ok(())
            }
        }
    }

    /// Parses request headers: assembles logical lines, detects folding
    /// with one byte of lookahead, and recognizes the block terminator.
    pub fn request_headers(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        loop {
            if self.request_status == HtpStreamState::CLOSED {
                // The stream ended mid-headers. Process what we have and
                // wrap the request up.
                self.commit_pending_request_header()?;
                self.request_buf.clear();
                self.request_mut_ok()?.request_progress = HtpRequestProgress::TRAILER;
                return self.state_request_headers();
            }
            match take_till_lf(rest) {
                Ok((remaining, line)) => {
                    self.request_curr_data
                        .seek(SeekFrom::Current(line.len() as i64))?;
                    self.check_request_buffer_limit(line.len())?;
                    let mut data = std::mem::take(&mut self.request_buf);
                    data.add(line);
                    rest = remaining;

                    if is_line_terminator(self.cfg.server_personality, data.as_slice(), false) {
                        // End of the header block.
                        self.commit_pending_request_header()?;
                        return self.state_request_headers();
                    }
                    let chomped = chomp(data.as_slice());
                    if !is_line_folded(chomped) {
                        // A new header line; the previous one is complete.
                        self.commit_pending_request_header()?;
                        let next_byte = remaining.first();
                        match next_byte {
                            Some(byte) if !is_folding_char(*byte) => {
                                // We know this line is not folded, so it
                                // can be processed without buffering.
                                self.process_request_header(chomped)?;
                            }
                            _ => {
                                // Keep the line until the folding question
                                // is settled by the next byte.
                                self.request_header = Some(Bstr::from(chomped));
                                self.request_header_folded = false;
                            }
                        }
                    } else if self.request_header.is_none() {
                        // A folded line with nothing to attach it to.
                        htp_warn_once!(
                            self.logger,
                            HtpLogCode::INVALID_REQUEST_FIELD_FOLDING,
                            "Invalid request field folding",
                            self.request_mut_ok()?.flags,
                            HtpFlags::INVALID_FOLDING
                        );
                        self.request_header = Some(Bstr::from(chomped));
                        self.request_header_folded = false;
                    } else if let Some(header) = &mut self.request_header {
                        // A continuation of the pending header.
                        header.add(chomped);
                        self.request_header_folded = true;
                    }
                }
                _ => return self.handle_request_absent_lf(rest),
            }
        }
    }

    /// Commits the buffered (possibly folded) header line, if any.
    fn commit_pending_request_header(&mut self) -> Result<()> {
        if let Some(header) = self.request_header.take() {
            self.process_request_header(header.as_slice())?;
        }
        Ok(())
    }

    /// Parses one logical request header line and merges it into the
    /// header table, coalescing repeated names.
    fn process_request_header(&mut self, raw: &[u8]) -> Result<()> {
        let parsed = parse_header_line(raw);
        let folded = self.request_header_folded;
        self.request_header_folded = false;
        let mut flags = 0u64;
        if folded {
            flags.set(HtpFlags::FIELD_FOLDED);
        }
        let tx = self.request_mut_ok()?;
        if parsed.flags.is_set(HeaderFlags::MISSING_COLON) {
            flags.set(HtpFlags::FIELD_UNPARSEABLE);
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::REQUEST_FIELD_MISSING_COLON,
                "Request field invalid: colon missing",
                tx.flags,
                HtpFlags::FIELD_UNPARSEABLE
            );
        } else if parsed.flags.is_set(HeaderFlags::NAME_EMPTY) {
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::REQUEST_INVALID_EMPTY_NAME,
                "Request field invalid: empty name",
                tx.flags,
                HtpFlags::FIELD_INVALID
            );
        }
        if parsed.flags.is_set(HeaderFlags::NAME_TRAILING_WHITESPACE) {
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::REQUEST_INVALID_LWS_AFTER_NAME,
                "Request field invalid: LWS after name",
                tx.flags,
                HtpFlags::FIELD_INVALID
            );
        }
        if parsed.flags.is_set(HeaderFlags::NAME_NON_TOKEN_CHARS) {
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::REQUEST_HEADER_INVALID,
                "Request header name is not a token",
                tx.flags,
                HtpFlags::FIELD_INVALID
            );
        }
        if parsed.flags.is_set(HeaderFlags::VALUE_CONTAINS_NUL) {
            flags.set(HtpFlags::FIELD_RAW_NUL);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::REQUEST_HEADER_INVALID,
                "Request header value contains raw NUL byte",
                tx.flags,
                HtpFlags::FIELD_RAW_NUL
            );
        }

        let header = Header::new_with_flags(parsed.name, parsed.value, flags);
        let mut repeated = false;
        let reps = tx.request_header_repetitions;
        let mut update_reps = false;
        if let Some((_, h_existing)) = tx.request_headers.get_nocase_mut(header.name.as_slice()) {
            if !h_existing.flags.is_set(HtpFlags::FIELD_REPEATED) {
                // This is the second occurrence of this header.
                repeated = true;
            } else if reps < 64 {
                update_reps = true;
            } else {
                return Ok(());
            }
            h_existing.flags.set(HtpFlags::FIELD_REPEATED);
            h_existing.flags.set(header.flags);
            // Having multiple C-L headers is against the RFC, but
            // servers may ignore the subsequent ones if the values are
            // the same.
            if header.name.cmp_nocase("Content-Length") == Ordering::Equal {
                let existing_cl = parse_content_length(h_existing.value.as_slice(), None);
                let new_cl = parse_content_length(header.value.as_slice(), None);
                if existing_cl.is_none() || new_cl.is_none() || existing_cl != new_cl {
                    htp_warn!(
                        tx.logger,
                        HtpLogCode::DUPLICATE_CONTENT_LENGTH_FIELD_IN_REQUEST,
                        "Ambiguous request C-L value"
                    );
                }
            } else {
                // Coalesce the values.
                h_existing.value.extend_from_slice(b", ");
                h_existing.value.extend_from_slice(header.value.as_slice());
            }
        } else {
            tx.request_headers.add(header.name.clone(), header);
        }
        if update_reps {
            tx.request_header_repetitions = tx.request_header_repetitions.wrapping_add(1)
        }
        if repeated {
            htp_warn!(
                tx.logger,
                HtpLogCode::REQUEST_HEADER_REPETITION,
                "Repetition for header"
            );
        }
        Ok(())
    }

    /// The single most subtle step of request parsing: with all headers
    /// in hand, decide the body framing and digest the headers that
    /// influence further parsing.
    pub fn process_request_headers(&mut self) -> Result<()> {
        let parse_cookies = self.cfg.parse_request_cookies;
        let parse_auth = self.cfg.parse_request_auth;
        let parse_multipart = self.cfg.parse_multipart;
        let tx = self.request_mut_ok()?;

        let te = tx
            .request_headers
            .get_nocase_nozero("transfer-encoding")
            .map(|(_, header)| header.clone());
        let cl = tx
            .request_headers
            .get_nocase_nozero("content-length")
            .map(|(_, header)| header.clone());

        if let Some(te) = &te {
            if trimmed(te.value.as_slice()) == b"chunked" {
                tx.request_transfer_coding = HtpTransferCoding::CHUNKED;
                if tx.request_protocol_number < HtpProtocol::V1_1 {
                    htp_warn!(
                        tx.logger,
                        HtpLogCode::RESPONSE_CHUNKED_OLD_PROTO,
                        "Chunked transfer-encoding on HTTP/0.9 or HTTP/1.0"
                    );
                }
            } else {
                // A Transfer-Encoding header whose value is not exactly
                // "chunked". Different servers disagree on what to do
                // with it, which makes the request a smuggling vehicle.
                tx.flags.set(HtpFlags::REQUEST_INVALID_T_E);
                htp_warn!(
                    tx.logger,
                    HtpLogCode::INVALID_REQUEST_TRANSFER_ENCODING,
                    "Invalid request Transfer-Encoding value"
                );
            }
            if cl.is_some() {
                tx.flags.set(HtpFlags::REQUEST_SMUGGLING);
                htp_warn!(
                    tx.logger,
                    HtpLogCode::REQUEST_SMUGGLING,
                    "Request has both Transfer-Encoding and Content-Length"
                );
            }
        }
        if tx.request_transfer_coding != HtpTransferCoding::CHUNKED {
            if let Some(cl) = &cl {
                tx.request_transfer_coding = HtpTransferCoding::IDENTITY;
                // A repeated or folded Content-Length is a classic
                // smuggling vector.
                if cl.flags.is_set(HtpFlags::FIELD_REPEATED)
                    || cl.flags.is_set(HtpFlags::FIELD_FOLDED)
                {
                    tx.flags.set(HtpFlags::REQUEST_SMUGGLING);
                }
                match parse_content_length(cl.value.as_slice(), Some(&tx.logger)) {
                    Some(content_length) => tx.request_content_length = content_length,
                    None => {
                        tx.flags.set(HtpFlags::REQUEST_INVALID_C_L);
                        htp_error!(
                            tx.logger,
                            HtpLogCode::INVALID_CONTENT_LENGTH_FIELD_IN_REQUEST,
                            "Invalid C-L field in request"
                        );
                        return Err(HtpStatus::ERROR);
                    }
                }
            } else if te.is_none() {
                tx.request_transfer_coding = HtpTransferCoding::NO_BODY;
            } else {
                // Unusable Transfer-Encoding and no Content-Length.
                tx.request_transfer_coding = HtpTransferCoding::NO_BODY;
            }
        }

        // Host: required on 1.1, must agree with a URI-carried host.
        let host_header = tx
            .request_headers
            .get_nocase_nozero("host")
            .map(|(_, header)| header.value.clone());
        match host_header {
            None => {
                if tx.request_protocol_number >= HtpProtocol::V1_1 {
                    tx.flags.set(HtpFlags::HOST_MISSING);
                    htp_warn!(
                        tx.logger,
                        HtpLogCode::HOST_MISSING,
                        "Host information in request headers required by HTTP/1.1"
                    );
                }
            }
            Some(host_value) => {
                if let Ok((_, (host, port, valid))) =
                    parse_hostport(trimmed(host_value.as_slice()))
                {
                    if !valid {
                        tx.flags.set(HtpFlags::HOSTH_INVALID);
                        htp_warn!(
                            tx.logger,
                            HtpLogCode::HOSTNAME_INVALID,
                            "Host header is not a valid hostname"
                        );
                    }
                    let mut hostname = Bstr::from(host);
                    hostname.make_ascii_lowercase();
                    match &tx.request_hostname {
                        Some(uri_hostname) => {
                            // The URI already named a host; it wins, but
                            // a disagreement is worth knowing about.
                            if uri_hostname.cmp_nocase(hostname.as_slice()) != Ordering::Equal {
                                tx.flags.set(HtpFlags::HOST_AMBIGUOUS);
                                htp_warn!(
                                    tx.logger,
                                    HtpLogCode::HOST_AMBIGUOUS,
                                    "Host information ambiguous"
                                );
                            }
                        }
                        None => {
                            tx.request_hostname = Some(hostname);
                            tx.request_port_number = port.and_then(|(_, port_nr)| port_nr);
                        }
                    }
                }
            }
        }

        // Content-Type, with parameters stripped. An unusable value is
        // simply not recorded.
        let ct = tx
            .request_headers
            .get_nocase_nozero("content-type")
            .and_then(|(_, ct)| parse_content_type(ct.value.as_slice()).ok());
        if ct.is_some() {
            tx.request_content_type = ct;
        }

        if parse_cookies {
            parse_cookies_v0(tx)?;
        }
        if parse_auth && parse_authorization(tx) == Err(HtpStatus::DECLINED) {
            tx.flags.set(HtpFlags::AUTH_INVALID);
            htp_warn!(
                tx.logger,
                HtpLogCode::AUTH_INVALID,
                "Unable to parse authentication header"
            );
        }

        // On a PUT request the body is an upload; route it to the file
        // data hooks.
        let wants_put_file = tx.request_method_number == HtpMethod::PUT
            && tx.request_transfer_coding != HtpTransferCoding::NO_BODY;
        if wants_put_file {
            self.put_file = Some(File::new(HtpFileSource::PUT, None));
        }
        if parse_multipart {
            match self.setup_request_multipart() {
                Err(HtpStatus::ERROR) => return Err(HtpStatus::ERROR),
                _ => {}
            }
        }
        Ok(())
    }

    /// Performs a check for a CONNECT transaction to decide whether
    /// inbound parsing needs to be suspended.
    pub fn request_connect_check(&mut self) -> Result<()> {
        // If the request uses the CONNECT method, there will not be a
        // request body, but we must wait for the response to learn
        // whether the tunnel was established.
        if self.request_mut_ok()?.request_method_number == HtpMethod::CONNECT {
            self.request_state = State::CONNECT_WAIT_RESPONSE;
            self.request_status = HtpStreamState::DATA_OTHER;
            return Err(HtpStatus::DATA_OTHER);
        }
        self.request_state = State::BODY_DETERMINE;
        Ok(())
    }

    /// Determines whether inbound parsing, which was suspended by a
    /// CONNECT transaction, can proceed.
    pub fn request_connect_wait_response(&mut self) -> Result<()> {
        // We cannot proceed until the response line of the current
        // transaction has been seen.
        if self.request_mut_ok()?.response_progress <= HtpResponseProgress::LINE {
            return Err(HtpStatus::DATA_OTHER);
        }
        if self
            .request_mut_ok()?
            .response_status_number
            .in_range(200, 299)
        {
            // The tunnel was established; wrap up the transaction and
            // stop interpreting this direction.
            self.state_request_complete()?;
            self.request_status = HtpStreamState::TUNNEL;
        } else {
            // No tunnel; continue to the next transaction.
            self.request_state = State::FINALIZE;
        }
        Ok(())
    }

    /// Determines the presence and framing of a request body.
    pub fn request_body_determine(&mut self) -> Result<()> {
        match self.request_mut_ok()?.request_transfer_coding {
            HtpTransferCoding::CHUNKED => {
                self.request_state = State::BODY_CHUNKED_LENGTH;
                self.request_mut_ok()?.request_progress = HtpRequestProgress::BODY
            }
            HtpTransferCoding::IDENTITY => {
                self.request_content_length = self.request_mut_ok()?.request_content_length;
                self.request_body_data_left = self.request_content_length;
                if self.request_content_length != 0 {
                    self.request_state = State::BODY_IDENTITY;
                    self.request_mut_ok()?.request_progress = HtpRequestProgress::BODY
                } else {
                    self.request_state = State::FINALIZE
                }
            }
            HtpTransferCoding::NO_BODY => {
                // This request does not have a body, which means we are
                // done with it.
                self.request_state = State::FINALIZE
            }
            _ => {
                // Should not be here.
                return Err(HtpStatus::ERROR);
            }
        }
        Ok(())
    }

    /// Extracts one chunk length line.
    pub fn request_body_chunked_length(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.request_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.check_request_buffer_limit(line.len())?;
                let mut data = std::mem::take(&mut self.request_buf);
                data.add(line);
                {
                    let tx = self.request_mut_ok()?;
                    tx.request_message_len =
                        tx.request_message_len.wrapping_add(data.len() as i64);
                }
                match parse_chunked_length(data.as_slice()) {
                    Ok((len, extension)) => {
                        if extension {
                            htp_warn!(
                                self.logger,
                                HtpLogCode::REQUEST_CHUNK_EXTENSION,
                                "Request chunk extension"
                            );
                        }
                        if len == 0 {
                            // End of the chunked data; trailers follow.
                            self.request_state = State::HEADERS;
                            self.request_mut_ok()?.request_progress =
                                HtpRequestProgress::TRAILER;
                        } else {
                            self.request_chunked_length = Some(len);
                            self.request_state = State::BODY_CHUNKED_DATA;
                        }
                        Ok(())
                    }
                    Err(_) => {
                        // An unusable chunk length is fatal for request
                        // parsing.
                        htp_error!(
                            self.logger,
                            HtpLogCode::INVALID_REQUEST_CHUNK_LEN,
                            "Request chunk encoding: invalid chunk length"
                        );
                        Err(HtpStatus::ERROR)
                    }
                }
            }
            _ => self.handle_request_absent_lf(data),
        }
    }

    /// Passes chunk payload to the body processor.
    pub fn request_body_chunked_data(&mut self, data: &[u8]) -> Result<()> {
        let remaining = self.request_chunked_length.unwrap_or(0) as usize;
        let bytes_to_consume = std::cmp::min(data.len(), remaining);
        if bytes_to_consume == 0 {
            return Err(HtpStatus::DATA);
        }
        self.request_process_body_data(Some(&data[0..bytes_to_consume]))?;
        self.request_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        {
            let tx = self.request_mut_ok()?;
            tx.request_message_len = tx
                .request_message_len
                .wrapping_add(bytes_to_consume as i64);
        }
        if let Some(len) = &mut self.request_chunked_length {
            *len -= bytes_to_consume as u64;
            if *len == 0 {
                // End of the chunk.
                self.request_state = State::BODY_CHUNKED_DATA_END;
                return Ok(());
            }
        }
        Err(HtpStatus::DATA)
    }

    /// Consumes the line ending that closes one chunk.
    pub fn request_body_chunked_data_end(&mut self, data: &[u8]) -> Result<()> {
        // Exactly one CRLF is expected here; anything else is tolerated,
        // byte by byte, until the LF.
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.request_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                let tx = self.request_mut_ok()?;
                tx.request_message_len = tx.request_message_len.wrapping_add(line.len() as i64);
                self.request_state = State::BODY_CHUNKED_LENGTH;
                Ok(())
            }
            _ => {
                self.request_curr_data.seek(SeekFrom::End(0))?;
                let tx = self.request_mut_ok()?;
                tx.request_message_len = tx.request_message_len.wrapping_add(data.len() as i64);
                Err(HtpStatus::DATA)
            }
        }
    }

    /// Processes an identity request body of known length.
    pub fn request_body_identity(&mut self, data: &[u8]) -> Result<()> {
        let bytes_to_consume = std::cmp::min(data.len(), self.request_body_data_left as usize);
        if bytes_to_consume == 0 {
            return Err(HtpStatus::DATA);
        }
        self.request_process_body_data(Some(&data[0..bytes_to_consume]))?;
        self.request_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        {
            let tx = self.request_mut_ok()?;
            tx.request_message_len = tx
                .request_message_len
                .wrapping_add(bytes_to_consume as i64);
        }
        self.request_body_data_left -= bytes_to_consume as i64;
        if self.request_body_data_left == 0 {
            // End of the request body.
            self.request_state = State::FINALIZE;
            return Ok(());
        }
        Err(HtpStatus::DATA)
    }

    /// Wraps up a request. Leftover inbound bytes that do not begin a
    /// plausible next request are reported as unexpected body data.
    pub fn request_finalize(&mut self, data: &[u8]) -> Result<()> {
        let mut work = data;
        if self.request_status != HtpStreamState::CLOSED {
            let next_byte = self
                .request_curr_data
                .get_ref()
                .get(self.request_curr_data.position() as usize);
            if next_byte.is_none() {
                return self.state_request_complete();
            }
            let lf = next_byte.map(|byte| *byte == b'\n').unwrap_or(false);
            if !lf {
                match take_till_lf(data) {
                    Ok((_, line)) => {
                        self.request_curr_data
                            .seek(SeekFrom::Current(line.len() as i64))?;
                        work = line;
                    }
                    _ => return self.handle_request_absent_lf(data),
                }
            } else {
                self.request_curr_data
                    .seek(SeekFrom::Current(work.len() as i64))?;
            }
        }
        self.check_request_buffer_limit(work.len())?;
        let mut data = std::mem::take(&mut self.request_buf);
        let buf_len = data.len();
        data.add(work);
        if data.is_empty() {
            // Closing.
            return self.state_request_complete();
        }
        if let Ok((_, (_, method))) =
            tuple::<_, _, nom::error::Error<&[u8]>, _>((take_is_space, take_not_is_space))(data.as_slice())
        {
            if method.is_empty() {
                // A whitespace line; pass it on as body data.
                return self.request_process_body_data(Some(data.as_slice()));
            }
            if convert_to_method(method) == HtpMethod::UNKNOWN {
                // Interpret the remaining bytes as body data.
                htp_warn!(
                    self.logger,
                    HtpLogCode::REQUEST_BODY_UNEXPECTED,
                    "Unexpected request body"
                );
                return self.request_process_body_data(Some(data.as_slice()));
            }
        }
        // The data looks like the start of the next request. Restore the
        // previously buffered portion and unread the line so the LINE
        // state sees it afresh.
        self.request_buf.add(&data.as_slice()[0..buf_len]);
        if self.request_curr_data.position() < data.len() as u64 {
            self.request_curr_data.set_position(0);
        } else {
            self.request_curr_data
                .seek(SeekFrom::Current(-(data.len() as i64)))?;
        }
        self.state_request_complete()
    }

    /// Consumes and discards inbound data after an HTTP/0.9 exchange.
    pub fn request_ignore_data_after_http_0_9(&mut self) -> Result<()> {
        let bytes_left = self.request_curr_data.get_ref().len() as u64
            - self.request_curr_data.position();
        if bytes_left > 0 {
            self.conn.flags.set(ConnectionFlags::HTTP_0_9_EXTRA);
        }
        self.request_curr_data.seek(SeekFrom::End(0))?;
        Err(HtpStatus::DATA)
    }

    /// Passes one slice of request body data to the body data hooks, the
    /// upload sink and the counters. None signals the end of the body.
    pub fn request_process_body_data(&mut self, data: Option<&[u8]>) -> Result<()> {
        if let Some(d) = data {
            if d.is_empty() {
                return Ok(());
            }
            let tx = self.request_mut_ok()?;
            tx.request_entity_len = tx.request_entity_len.wrapping_add(d.len() as i64);
        }
        // Transaction-level hooks run first, configuration hooks second.
        let tx = self.request_mut_ok()?;
        let tx_hook = tx.hook_request_body_data.clone();
        tx_hook.run_all(&mut Data::new(tx, data, data.is_none()))?;
        let cfg_hook = self.cfg.hook_request_body_data.clone();
        let tx = self.request_mut_ok()?;
        cfg_hook.run_all(&mut Data::new(tx, data, data.is_none()))?;
        // On PUT requests, treat the request body as a file. The final
        // (end of file) signal is sent at request completion.
        if let Some(d) = data {
            if let Some(mut file) = self.put_file.take() {
                file.write(d)?;
                file.handle_file_data(&self.cfg.hook_request_file_data, Some(d))?;
                self.put_file = Some(file);
            }
        }
        Ok(())
    }

    /// Process a chunk of inbound (client or request) data.
    ///
    /// A zero-length chunk is allowed only after the inbound stream has
    /// been declared closed, and triggers finalization.
    pub fn request_data(
        &mut self,
        chunk: &[u8],
        timestamp: Option<OffsetDateTime>,
    ) -> HtpStreamState {
        // Reject data on a direction that was stopped or poisoned.
        if self.request_status == HtpStreamState::STOP {
            htp_info!(
                self.logger,
                HtpLogCode::PARSER_STATE_ERROR,
                "Inbound parser is in STOP state"
            );
            return HtpStreamState::STOP;
        }
        if self.request_status == HtpStreamState::ERROR {
            htp_error!(
                self.logger,
                HtpLogCode::PARSER_STATE_ERROR,
                "Inbound parser is in ERROR state"
            );
            return HtpStreamState::ERROR;
        }
        // Sanity check: a transaction must exist unless we are idle.
        if self.request().is_none()
            && self.request_state != State::IDLE
            && self.request_state != State::IGNORE_DATA_AFTER_HTTP_0_9
        {
            self.request_status = HtpStreamState::ERROR;
            htp_error!(
                self.logger,
                HtpLogCode::MISSING_INBOUND_TRANSACTION_DATA,
                "Missing inbound transaction data"
            );
            return HtpStreamState::ERROR;
        }
        // Zero-length chunks are only used internally to signal stream
        // closure.
        if chunk.is_empty() && self.request_status != HtpStreamState::CLOSED {
            htp_error!(
                self.logger,
                HtpLogCode::ZERO_LENGTH_DATA_CHUNKS,
                "Zero-length data chunks are not allowed"
            );
            return HtpStreamState::CLOSED;
        }
        if timestamp.is_some() {
            self.request_timestamp = timestamp;
        }
        // Store the current chunk.
        self.request_curr_data = Cursor::new(chunk.to_vec());
        self.request_current_receiver_offset = 0;
        self.request_chunk_count = self.request_chunk_count.wrapping_add(1);
        self.conn.track_inbound_data(chunk.len());
        // In tunneling mode the bytes are opaque; do not interpret them.
        if self.request_status == HtpStreamState::TUNNEL {
            return HtpStreamState::TUNNEL;
        }
        if self.response_status == HtpStreamState::DATA_OTHER {
            self.response_status = HtpStreamState::DATA;
        }
        // Invoke the state functions in a loop until an error occurs or
        // we run out of data. The state functions supply their own log
        // messages, so this loop stays quiet.
        loop {
            let mut rc = self.handle_request_state(chunk);
            if rc.is_ok() {
                if self.request_status == HtpStreamState::TUNNEL {
                    return HtpStreamState::TUNNEL;
                }
                rc = self.request_handle_state_change();
            }
            match rc {
                // Continue looping.
                Ok(_) => {}
                // Need more data.
                Err(HtpStatus::DATA) | Err(HtpStatus::DATA_BUFFER) => {
                    // Ignore result.
                    let _ = self.request_receiver_send_data(false);
                    if self.request_status != HtpStreamState::CLOSED {
                        self.request_status = HtpStreamState::DATA;
                    }
                    return HtpStreamState::DATA;
                }
                // Suspended parsing; the other direction goes first.
                Err(HtpStatus::DATA_OTHER) => {
                    if self.request_curr_data.position()
                        >= self.request_curr_data.get_ref().len() as u64
                    {
                        // The whole chunk was consumed, so the caller
                        // need not resupply anything.
                        self.request_status = HtpStreamState::DATA;
                        return HtpStreamState::DATA;
                    }
                    self.request_status = HtpStreamState::DATA_OTHER;
                    return HtpStreamState::DATA_OTHER;
                }
                // A callback asked us to stop.
                Err(HtpStatus::STOP) => {
                    self.request_status = HtpStreamState::STOP;
                    return HtpStreamState::STOP;
                }
                // Permanent stream error.
                Err(_) => {
                    self.request_status = HtpStreamState::ERROR;
                    return HtpStreamState::ERROR;
                }
            }
        }
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"GET", HtpMethod::GET)]
    #[case(b"CONNECT", HtpMethod::CONNECT)]
    #[case(b"get", HtpMethod::UNKNOWN)]
    #[case(b"", HtpMethod::UNKNOWN)]
    #[case(b"BASELINE-CONTROL", HtpMethod::BASELINE_CONTROL)]
    fn methods(#[case] input: &[u8], #[case] expected: HtpMethod) {
        assert_eq!(convert_to_method(input), expected);
    }
}
