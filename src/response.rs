use crate::{
    bstr::Bstr,
    connection_parser::{ConnectionParser, HtpStreamState, State},
    decompressors::{Decompressor, HtpContentEncoding},
    error::Result,
    hook::DataHook,
    parsers::{
        parse_chunked_length, parse_content_length, parse_content_type, parse_header_line,
        parse_protocol, parse_status, HeaderFlags,
    },
    request::HtpMethod,
    transaction::{
        Data, Header, HtpProtocol, HtpResponseNumber, HtpResponseProgress, HtpTransferCoding,
    },
    util::{
        chomp, is_folding_char, is_line_folded, is_line_ignorable, is_line_terminator,
        is_valid_chunked_length_data, take_is_space, take_not_is_space, take_till_lf,
        treat_response_line_as_body, FlagOperations, HtpFlags,
    },
    HtpStatus,
};
use nom::sequence::tuple;
use std::cmp::Ordering;
use std::io::{Cursor, Seek, SeekFrom};
use time::OffsetDateTime;

impl ConnectionParser {
    /// Sends outstanding raw connection data to the active data receiver
    /// hook.
    fn response_receiver_send_data(&mut self, is_last: bool) -> Result<()> {
        let hook = match &self.response_data_receiver_hook {
            Some(hook) => hook.clone(),
            None => return Ok(()),
        };
        let start = self.response_current_receiver_offset as usize;
        let end = self.response_curr_data.position() as usize;
        if end > start {
            let index = self.response_tx_index().ok_or(HtpStatus::ERROR)?;
            let raw = &self.response_curr_data.get_ref()[start..end];
            let tx = self.conn.tx_mut(index).ok_or(HtpStatus::ERROR)?;
            hook.run_all(&mut Data::new(tx, Some(raw), is_last))?;
        }
        self.response_current_receiver_offset = self.response_curr_data.position();
        Ok(())
    }

    /// Configures the data receiver hook. If there is a previous hook, it
    /// will be finalized and cleared.
    fn response_receiver_set(&mut self, data_receiver_hook: Option<DataHook>) -> Result<()> {
        // Ignore result.
        let _ = self.response_receiver_finalize_clear();
        self.response_data_receiver_hook = data_receiver_hook;
        self.response_current_receiver_offset = self.response_curr_data.position();
        Ok(())
    }

    /// Finalizes the active data receiver hook by sending any outstanding
    /// data to it, then removes it.
    pub fn response_receiver_finalize_clear(&mut self) -> Result<()> {
        if self.response_data_receiver_hook.is_none() {
            return Ok(());
        }
        let rc = self.response_receiver_send_data(true);
        self.response_data_receiver_hook = None;
        rc
    }

    /// Handles response parser state changes, configuring data receivers
    /// as header and trailer parsing begins.
    fn response_handle_state_change(&mut self) -> Result<()> {
        if self.response_state_previous == self.response_state {
            return Ok(());
        }
        if self.response_state == State::HEADERS {
            let header_fn = Some(self.cfg.hook_response_header_data.clone());
            let trailer_fn = Some(self.cfg.hook_response_trailer_data.clone());
            match self.response_mut_ok()?.response_progress {
                HtpResponseProgress::HEADERS => self.response_receiver_set(header_fn),
                HtpResponseProgress::TRAILER => self.response_receiver_set(trailer_fn),
                _ => Ok(()),
            }?;
        }
        self.response_state_previous = self.response_state;
        Ok(())
    }

    /// Enforces the buffering limit for outbound lines kept across input
    /// chunks.
    fn check_response_buffer_limit(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut newlen = self.response_buf.len().wrapping_add(len);
        if let Some(header) = &self.response_header {
            newlen = newlen.wrapping_add(header.len())
        }
        if newlen > self.cfg.field_limit {
            htp_error!(
                self.logger,
                HtpLogCode::RESPONSE_FIELD_TOO_LONG,
                format!(
                    "Response buffer over the limit: size {} limit {}.",
                    newlen, self.cfg.field_limit
                )
            );
            return Err(HtpStatus::ERROR);
        }
        Ok(())
    }

    /// Buffers the unconsumed tail of the current chunk for the next
    /// invocation.
    pub fn handle_response_absent_lf(&mut self, data: &[u8]) -> Result<()> {
        self.response_curr_data.seek(SeekFrom::End(0))?;
        self.check_response_buffer_limit(data.len())?;
        self.response_buf.add(data);
        Err(HtpStatus::DATA_BUFFER)
    }

    /// The idle state: begin the next response when data is available.
    pub fn response_idle(&mut self) -> Result<()> {
        if self.response_curr_data.position() >= self.response_curr_data.get_ref().len() as u64 {
            return Err(HtpStatus::DATA);
        }
        self.state_response_start()
    }

    /// Parses the response line state.
    pub fn response_line(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.response_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.response_line_complete(line)
            }
            _ => {
                if self.response_status == HtpStreamState::CLOSED {
                    self.response_curr_data.seek(SeekFrom::End(0))?;
                    self.response_line_complete(data)
                } else {
                    self.handle_response_absent_lf(data)
                }
            }
        }
    }

    /// Processes one complete response line.
    fn response_line_complete(&mut self, line: &[u8]) -> Result<()> {
        self.check_response_buffer_limit(line.len())?;
        let mut data = std::mem::take(&mut self.response_buf);
        data.add(line);
        if data.is_empty() {
            return Err(HtpStatus::DATA);
        }
        if is_line_ignorable(self.cfg.server_personality, data.as_slice()) {
            if self.response_status == HtpStreamState::CLOSED {
                self.response_state = State::FINALIZE;
            }
            // An empty/whitespace line; note it, ignore it, move on.
            let tx = self.response_mut_ok()?;
            tx.response_ignored_lines = tx.response_ignored_lines.wrapping_add(1);
            return Ok(());
        }
        // If the line does not look like a status line at all, browsers
        // display it as content, and so do we.
        if treat_response_line_as_body(data.as_slice()) {
            let tx = self.response_mut_ok()?;
            tx.flags.set(HtpFlags::STATUS_LINE_INVALID);
            tx.response_content_encoding_processing = HtpContentEncoding::NONE;
            self.response_process_body_data(Some(data.as_slice()))?;
            // Because there are no headers to parse, assume the body
            // continues until the end of the stream.
            if self.response_curr_data.position()
                >= self.response_curr_data.get_ref().len() as u64
            {
                let tx = self.response_mut_ok()?;
                tx.response_transfer_coding = HtpTransferCoding::IDENTITY;
                tx.response_progress = HtpResponseProgress::BODY;
                self.response_body_data_left = -1;
                self.response_state = State::BODY_IDENTITY_STREAM_CLOSE;
            }
            return Ok(());
        }
        // Clear any leftovers from an earlier interim response line.
        {
            let tx = self.response_mut_ok()?;
            tx.response_line = None;
            tx.response_protocol = None;
            tx.response_status = None;
            tx.response_message = None;
        }
        let data = chomp(data.as_slice());
        self.parse_response_line(data)?;
        self.state_response_line()?;
        // Move on to the headers.
        self.response_state = State::HEADERS;
        self.response_mut_ok()?.response_progress = HtpResponseProgress::HEADERS;
        Ok(())
    }

    /// Splits a response line into protocol, status code and message.
    pub fn parse_response_line(&mut self, response_line: &[u8]) -> Result<()> {
        let tx = self.response_mut_ok()?;
        tx.response_line = Some(Bstr::from(response_line));
        tx.response_protocol_number = HtpProtocol::INVALID;
        tx.response_status_number = HtpResponseNumber::INVALID;

        let mut line_parser = tuple::<_, _, nom::error::Error<&[u8]>, _>((
            take_is_space,
            take_not_is_space,
            take_is_space,
            take_not_is_space,
            take_is_space,
        ));
        if let Ok((message, (_, protocol, _, status, _))) = line_parser(response_line) {
            if protocol.is_empty() {
                return Ok(());
            }
            tx.response_protocol = Some(Bstr::from(protocol));
            tx.response_protocol_number = parse_protocol(protocol, &tx.logger);
            if status.is_empty() {
                return Ok(());
            }
            tx.response_status = Some(Bstr::from(status));
            tx.response_status_number = parse_status(status);
            if tx.response_status_number == HtpResponseNumber::INVALID {
                htp_warn!(
                    tx.logger,
                    HtpLogCode::RESPONSE_LINE_INVALID_RESPONSE_STATUS,
                    "Response line: invalid response status"
                );
            }
            // The message stretches until the end of the line.
            tx.response_message = Some(Bstr::from(message));
        }
        Ok(())
    }

    /// Parses response headers: the same line assembly and folding rules
    /// as the request side.
    pub fn response_headers(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        loop {
            if self.response_status == HtpStreamState::CLOSED {
                // The stream ended mid-headers.
                self.commit_pending_response_header()?;
                self.response_buf.clear();
                self.response_mut_ok()?.response_progress = HtpResponseProgress::TRAILER;
                self.state_response_headers()?;
                self.response_state = State::FINALIZE;
                return Ok(());
            }
            match take_till_lf(rest) {
                Ok((remaining, line)) => {
                    self.response_curr_data
                        .seek(SeekFrom::Current(line.len() as i64))?;
                    self.check_response_buffer_limit(line.len())?;
                    let mut data = std::mem::take(&mut self.response_buf);
                    data.add(line);
                    rest = remaining;

                    if is_line_terminator(self.cfg.server_personality, data.as_slice(), false) {
                        // End of the header block.
                        self.commit_pending_response_header()?;
                        let progress = self.response_mut_ok()?.response_progress;
                        if progress == HtpResponseProgress::HEADERS {
                            // The next step decides whether this response
                            // has a body.
                            self.response_state = State::BODY_DETERMINE;
                        } else {
                            // Trailers.
                            self.state_response_headers()?;
                            self.response_state = State::FINALIZE;
                        }
                        return Ok(());
                    }
                    let chomped = chomp(data.as_slice());
                    if !is_line_folded(chomped) {
                        self.commit_pending_response_header()?;
                        let next_byte = remaining.first();
                        match next_byte {
                            Some(byte) if !is_folding_char(*byte) => {
                                self.process_response_header(chomped)?;
                            }
                            _ => {
                                self.response_header = Some(Bstr::from(chomped));
                                self.response_header_folded = false;
                            }
                        }
                    } else if self.response_header.is_none() {
                        htp_warn_once!(
                            self.logger,
                            HtpLogCode::INVALID_RESPONSE_FIELD_FOLDING,
                            "Invalid response field folding",
                            self.response_mut_ok()?.flags,
                            HtpFlags::INVALID_FOLDING
                        );
                        self.response_header = Some(Bstr::from(chomped));
                        self.response_header_folded = false;
                    } else if let Some(header) = &mut self.response_header {
                        header.add(chomped);
                        self.response_header_folded = true;
                    }
                }
                _ => return self.handle_response_absent_lf(rest),
            }
        }
    }

    /// Commits the buffered (possibly folded) header line, if any.
    fn commit_pending_response_header(&mut self) -> Result<()> {
        if let Some(header) = self.response_header.take() {
            self.process_response_header(header.as_slice())?;
        }
        Ok(())
    }

    /// Parses one logical response header line and merges it into the
    /// header table.
    fn process_response_header(&mut self, raw: &[u8]) -> Result<()> {
        let parsed = parse_header_line(raw);
        let folded = self.response_header_folded;
        self.response_header_folded = false;
        let mut flags = 0u64;
        if folded {
            flags.set(HtpFlags::FIELD_FOLDED);
        }
        let tx = self.response_mut_ok()?;
        if parsed.flags.is_set(HeaderFlags::MISSING_COLON) {
            flags.set(HtpFlags::FIELD_UNPARSEABLE);
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::RESPONSE_FIELD_MISSING_COLON,
                "Response field invalid: missing colon",
                tx.flags,
                HtpFlags::FIELD_UNPARSEABLE
            );
        } else if parsed.flags.is_set(HeaderFlags::NAME_EMPTY) {
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::RESPONSE_INVALID_EMPTY_NAME,
                "Response field invalid: empty name",
                tx.flags,
                HtpFlags::FIELD_INVALID
            );
        }
        if parsed.flags.is_set(HeaderFlags::NAME_TRAILING_WHITESPACE) {
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::RESPONSE_INVALID_LWS_AFTER_NAME,
                "Response field invalid: LWS after name",
                tx.flags,
                HtpFlags::FIELD_INVALID
            );
        }
        if parsed.flags.is_set(HeaderFlags::NAME_NON_TOKEN_CHARS) {
            flags.set(HtpFlags::FIELD_INVALID);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::RESPONSE_HEADER_INVALID,
                "Response header name is not a token",
                tx.flags,
                HtpFlags::FIELD_INVALID
            );
        }
        if parsed.flags.is_set(HeaderFlags::VALUE_CONTAINS_NUL) {
            flags.set(HtpFlags::FIELD_RAW_NUL);
            htp_warn_once!(
                tx.logger,
                HtpLogCode::RESPONSE_HEADER_INVALID,
                "Response header value contains raw NUL byte",
                tx.flags,
                HtpFlags::FIELD_RAW_NUL
            );
        }

        let header = Header::new_with_flags(parsed.name, parsed.value, flags);
        let mut repeated = false;
        let reps = tx.response_header_repetitions;
        let mut update_reps = false;
        if let Some((_, h_existing)) = tx.response_headers.get_nocase_mut(header.name.as_slice()) {
            if !h_existing.flags.is_set(HtpFlags::FIELD_REPEATED) {
                repeated = true;
            } else if reps < 64 {
                update_reps = true;
            } else {
                return Ok(());
            }
            h_existing.flags.set(HtpFlags::FIELD_REPEATED);
            h_existing.flags.set(header.flags);
            if header.name.cmp_nocase("Content-Length") == Ordering::Equal {
                let existing_cl = parse_content_length(h_existing.value.as_slice(), None);
                let new_cl = parse_content_length(header.value.as_slice(), None);
                if existing_cl.is_none() || new_cl.is_none() || existing_cl != new_cl {
                    htp_warn!(
                        tx.logger,
                        HtpLogCode::DUPLICATE_CONTENT_LENGTH_FIELD_IN_RESPONSE,
                        "Ambiguous response C-L value"
                    );
                }
            } else {
                h_existing.value.extend_from_slice(b", ");
                h_existing.value.extend_from_slice(header.value.as_slice());
            }
        } else {
            tx.response_headers.add(header.name.clone(), header);
        }
        if update_reps {
            tx.response_header_repetitions = tx.response_header_repetitions.wrapping_add(1)
        }
        if repeated {
            htp_warn!(
                tx.logger,
                HtpLogCode::RESPONSE_HEADER_REPETITION,
                "Repetition for header"
            );
        }
        Ok(())
    }

    /// Determines the presence and framing of a response body, including
    /// the CONNECT and 100 Continue special cases.
    pub fn response_body_determine(&mut self) -> Result<()> {
        // A successful CONNECT means the remainder of both streams is a
        // tunnel, and we stop interpreting it.
        if self.response_mut_ok()?.request_method_number == HtpMethod::CONNECT {
            let status = self.response_mut_ok()?.response_status_number;
            if status.in_range(200, 299) {
                self.response_state = State::FINALIZE;
                self.response_status = HtpStreamState::TUNNEL;
                // We may still have response headers.
                return self.state_response_headers();
            } else if status.eq_num(407) {
                // Proxy authentication required; request parsing resumes.
                if self.request_status == HtpStreamState::DATA_OTHER {
                    self.request_status = HtpStreamState::DATA;
                }
            } else {
                // A failed CONNECT; unblock request parsing, but make a
                // note to pause at the end of this transaction so the
                // request side catches up first.
                if self.request_status == HtpStreamState::DATA_OTHER {
                    self.request_status = HtpStreamState::DATA;
                }
                self.response_data_other_at_tx_end = true;
            }
        }

        let te = self
            .response_mut_ok()?
            .response_headers
            .get_nocase_nozero("transfer-encoding")
            .map(|(_, header)| header.clone());
        let cl = self
            .response_mut_ok()?
            .response_headers
            .get_nocase_nozero("content-length")
            .map(|(_, header)| header.clone());

        // An interim "100 Continue" response: discard the headers seen
        // so far and expect another, real status line to follow.
        if self.response_mut_ok()?.response_status_number.eq_num(100)
            && te.is_none()
            && cl.is_none()
        {
            if self.response_mut_ok()?.seen_100continue {
                htp_error!(
                    self.logger,
                    HtpLogCode::CONTINUE_ALREADY_SEEN,
                    "Already seen 100-Continue"
                );
                return Err(HtpStatus::ERROR);
            }
            let tx = self.response_mut_ok()?;
            tx.response_headers.elements.clear();
            tx.response_progress = HtpResponseProgress::LINE;
            tx.seen_100continue = true;
            self.response_state = State::LINE;
            return Ok(());
        }
        if self.response_mut_ok()?.response_status_number.eq_num(100) {
            // A 100 status carrying body framing headers is not an
            // interim response; belatedly report its line.
            let hook_response_line = self.cfg.hook_response_line.clone();
            let tx = self.response_mut_ok()?;
            hook_response_line.run_all(tx)?;
        }

        // Responses that structurally have no body.
        let request_method = self.response_mut_ok()?.request_method_number;
        let status = self.response_mut_ok()?.response_status_number;
        if request_method == HtpMethod::HEAD {
            let tx = self.response_mut_ok()?;
            tx.response_transfer_coding = HtpTransferCoding::NO_BODY;
            self.response_state = State::FINALIZE;
        } else if status.in_range(100, 199) || status.eq_num(204) || status.eq_num(304) {
            if te.is_none() && cl.is_none() {
                let tx = self.response_mut_ok()?;
                tx.response_transfer_coding = HtpTransferCoding::NO_BODY;
                self.response_state = State::FINALIZE;
            } else {
                htp_warn!(
                    self.logger,
                    HtpLogCode::RESPONSE_BODY_UNEXPECTED,
                    "Unexpected response body"
                );
            }
        }

        let mut multipart_byteranges = false;
        if self.response_state != State::FINALIZE {
            // This response has a body; find its framing.
            let ct = self
                .response_mut_ok()?
                .response_headers
                .get_nocase_nozero("content-type")
                .map(|(_, header)| header.value.clone());
            if let Some(ct) = ct {
                if let Ok(response_content_type) = parse_content_type(ct.as_slice()) {
                    if response_content_type
                        .index_of_nocase("multipart/byteranges")
                        .is_some()
                    {
                        multipart_byteranges = true;
                    }
                    self.response_mut_ok()?.response_content_type = Some(response_content_type);
                }
            }
            if let Some(te) = te.filter(|te| {
                te.value.index_of_nocase_nozero("chunked").is_some()
            }) {
                // Chunked transfer coding wins over Content-Length.
                if te.value.cmp_nocase("chunked") != Ordering::Equal {
                    htp_warn!(
                        self.logger,
                        HtpLogCode::RESPONSE_ABNORMAL_TRANSFER_ENCODING,
                        "Transfer-encoding has abnormal chunked value"
                    );
                }
                if self.response_mut_ok()?.response_protocol_number < HtpProtocol::V1_1 {
                    htp_warn!(
                        self.logger,
                        HtpLogCode::RESPONSE_CHUNKED_OLD_PROTO,
                        "Chunked transfer-encoding on HTTP/0.9 or HTTP/1.0"
                    );
                }
                let tx = self.response_mut_ok()?;
                tx.response_transfer_coding = HtpTransferCoding::CHUNKED;
                if cl.is_some() {
                    tx.flags.set(HtpFlags::REQUEST_SMUGGLING);
                }
                tx.response_progress = HtpResponseProgress::BODY;
                self.response_state = State::BODY_CHUNKED_LENGTH;
            } else if let Some(cl) = cl {
                self.response_mut_ok()?.response_transfer_coding = HtpTransferCoding::IDENTITY;
                if cl.flags.is_set(HtpFlags::FIELD_REPEATED) {
                    self.response_mut_ok()?.flags.set(HtpFlags::REQUEST_SMUGGLING);
                }
                match parse_content_length(cl.value.as_slice(), Some(&self.logger)) {
                    Some(content_length) => {
                        let tx = self.response_mut_ok()?;
                        tx.response_content_length = content_length;
                        self.response_content_length = content_length;
                        self.response_body_data_left = content_length;
                        if content_length != 0 {
                            self.response_state = State::BODY_IDENTITY_CL_KNOWN;
                            self.response_mut_ok()?.response_progress =
                                HtpResponseProgress::BODY;
                        } else {
                            self.response_state = State::FINALIZE;
                        }
                    }
                    None => {
                        htp_error!(
                            self.logger,
                            HtpLogCode::INVALID_CONTENT_LENGTH_FIELD_IN_RESPONSE,
                            "Invalid C-L field in response"
                        );
                        return Err(HtpStatus::ERROR);
                    }
                }
            } else {
                // multipart/byteranges is self-delimiting; we do not
                // parse it.
                if multipart_byteranges {
                    htp_error!(
                        self.logger,
                        HtpLogCode::RESPONSE_MULTIPART_BYTERANGES,
                        "C-T multipart/byteranges in responses not supported"
                    );
                    return Err(HtpStatus::ERROR);
                }
                // Terminated by the close of the stream.
                let tx = self.response_mut_ok()?;
                tx.response_transfer_coding = HtpTransferCoding::IDENTITY;
                tx.response_progress = HtpResponseProgress::BODY;
                self.response_body_data_left = -1;
                self.response_state = State::BODY_IDENTITY_STREAM_CLOSE;
            }
        }
        self.state_response_headers()
    }

    /// Inspects the Content-Encoding response header and readies the
    /// decompressor when body decompression is called for.
    pub fn setup_response_content_encoding(&mut self) -> Result<()> {
        let decompression_enabled = self.cfg.response_decompression_enabled;
        let tx = self.response_mut_ok()?;
        let encoding = match tx.response_headers.get_nocase_nozero("content-encoding") {
            Some((_, ce)) => {
                let mut value = ce.value.clone();
                value.make_ascii_lowercase();
                if value.eq_slice("gzip") || value.eq_slice("x-gzip") {
                    HtpContentEncoding::GZIP
                } else if value.eq_slice("deflate") || value.eq_slice("x-deflate") {
                    HtpContentEncoding::DEFLATE
                } else {
                    // Unknown encodings pass through unchanged.
                    HtpContentEncoding::NONE
                }
            }
            None => HtpContentEncoding::NONE,
        };
        tx.response_content_encoding = encoding;
        tx.response_content_encoding_processing = if decompression_enabled {
            encoding
        } else {
            HtpContentEncoding::NONE
        };
        if tx.response_content_encoding_processing != HtpContentEncoding::NONE {
            tx.response_decompressor =
                Some(Decompressor::new(tx.response_content_encoding_processing)?);
        }
        Ok(())
    }

    /// Extracts one chunk length line. Unlike on the request side, an
    /// invalid response chunk length does not kill the stream: the rest
    /// of the body is consumed as identity data until close.
    pub fn response_body_chunked_length(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((remaining, line)) => {
                self.response_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.check_response_buffer_limit(line.len())?;
                if line == b"\n" && self.response_buf.is_empty() {
                    let tx = self.response_mut_ok()?;
                    tx.response_message_len =
                        tx.response_message_len.wrapping_add(line.len() as i64);
                    // An empty chunk-length line; try to continue.
                    return self.response_body_chunked_length(remaining);
                }
                let mut data = std::mem::take(&mut self.response_buf);
                data.add(line);
                {
                    let tx = self.response_mut_ok()?;
                    tx.response_message_len =
                        tx.response_message_len.wrapping_add(data.len() as i64);
                }
                match parse_chunked_length(data.as_slice()) {
                    Ok((len, extension)) => {
                        if extension {
                            htp_warn!(
                                self.logger,
                                HtpLogCode::RESPONSE_CHUNK_EXTENSION,
                                "Response chunk extension"
                            );
                        }
                        if len == 0 {
                            self.response_state = State::HEADERS;
                            self.response_mut_ok()?.response_progress =
                                HtpResponseProgress::TRAILER;
                        } else {
                            self.response_chunked_length = Some(len);
                            self.response_state = State::BODY_CHUNKED_DATA;
                        }
                        Ok(())
                    }
                    Err(_) => {
                        // Not a chunk length; reprocess the line as body
                        // data until the stream closes.
                        self.response_curr_data
                            .seek(SeekFrom::Current(-(line.len() as i64)))?;
                        self.response_state = State::BODY_IDENTITY_STREAM_CLOSE;
                        self.response_mut_ok()?.response_transfer_coding =
                            HtpTransferCoding::IDENTITY;
                        htp_error!(
                            self.logger,
                            HtpLogCode::INVALID_RESPONSE_CHUNK_LEN,
                            "Response chunk encoding: invalid chunk length"
                        );
                        Ok(())
                    }
                }
            }
            _ => {
                if !is_valid_chunked_length_data(data) {
                    // The bytes seen so far can no longer begin a valid
                    // chunk length line.
                    self.response_state = State::BODY_IDENTITY_STREAM_CLOSE;
                    self.response_mut_ok()?.response_transfer_coding =
                        HtpTransferCoding::IDENTITY;
                    htp_error!(
                        self.logger,
                        HtpLogCode::INVALID_RESPONSE_CHUNK_LEN,
                        "Response chunk encoding: invalid chunk length"
                    );
                    return Ok(());
                }
                self.handle_response_absent_lf(data)
            }
        }
    }

    /// Passes chunk payload to the body processor.
    pub fn response_body_chunked_data(&mut self, data: &[u8]) -> Result<()> {
        let remaining = self.response_chunked_length.unwrap_or(0) as usize;
        let bytes_to_consume = std::cmp::min(data.len(), remaining);
        if bytes_to_consume == 0 {
            return Err(HtpStatus::DATA);
        }
        self.response_process_body_data(Some(&data[0..bytes_to_consume]))?;
        self.response_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        if let Some(len) = &mut self.response_chunked_length {
            *len -= bytes_to_consume as u64;
            if *len == 0 {
                // End of the chunk.
                self.response_state = State::BODY_CHUNKED_DATA_END;
                return Ok(());
            }
        }
        Err(HtpStatus::DATA)
    }

    /// Consumes the line ending that closes one chunk.
    pub fn response_body_chunked_data_end(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.response_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                let tx = self.response_mut_ok()?;
                tx.response_message_len = tx.response_message_len.wrapping_add(line.len() as i64);
                self.response_state = State::BODY_CHUNKED_LENGTH;
                Ok(())
            }
            _ => {
                self.response_curr_data.seek(SeekFrom::End(0))?;
                let tx = self.response_mut_ok()?;
                tx.response_message_len = tx.response_message_len.wrapping_add(data.len() as i64);
                Err(HtpStatus::DATA)
            }
        }
    }

    /// Processes an identity response body of known length.
    pub fn response_body_identity_cl_known(&mut self, data: &[u8]) -> Result<()> {
        if self.response_status == HtpStreamState::CLOSED {
            self.response_state = State::FINALIZE;
            // Sends the close signal to the decompressors.
            return self.response_process_body_data(None);
        }
        let bytes_to_consume = std::cmp::min(data.len(), self.response_body_data_left as usize);
        if bytes_to_consume == 0 {
            return Err(HtpStatus::DATA);
        }
        self.response_process_body_data(Some(&data[0..bytes_to_consume]))?;
        self.response_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        self.response_body_data_left -= bytes_to_consume as i64;
        if self.response_body_data_left == 0 {
            // The entire response body has been seen.
            self.response_state = State::FINALIZE;
            return self.response_process_body_data(None);
        }
        Err(HtpStatus::DATA)
    }

    /// Processes an identity response body of unknown length: everything
    /// until the close of the stream is body.
    pub fn response_body_identity_stream_close(&mut self, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            self.response_process_body_data(Some(data))?;
            self.response_curr_data.seek(SeekFrom::End(0))?;
        }
        if self.response_status == HtpStreamState::CLOSED {
            self.response_state = State::FINALIZE;
            return Ok(());
        }
        Err(HtpStatus::DATA)
    }

    /// Wraps up a response. Leftover outbound bytes that look nothing
    /// like a status line are reported as unexpected body data.
    pub fn response_finalize(&mut self, data: &[u8]) -> Result<()> {
        let mut work = data;
        if self.response_status != HtpStreamState::CLOSED {
            let next_byte = self
                .response_curr_data
                .get_ref()
                .get(self.response_curr_data.position() as usize);
            if next_byte.is_none() {
                return self.state_response_complete();
            }
            let lf = next_byte.map(|byte| *byte == b'\n').unwrap_or(false);
            if !lf {
                match take_till_lf(data) {
                    Ok((_, line)) => {
                        self.response_curr_data
                            .seek(SeekFrom::Current(line.len() as i64))?;
                        work = line;
                    }
                    _ => return self.handle_response_absent_lf(data),
                }
            } else {
                self.response_curr_data
                    .seek(SeekFrom::Current(work.len() as i64))?;
            }
        }
        self.check_response_buffer_limit(work.len())?;
        let mut data = std::mem::take(&mut self.response_buf);
        let buf_len = data.len();
        data.add(work);
        if data.is_empty() {
            // Closing.
            return self.state_response_complete();
        }
        if treat_response_line_as_body(data.as_slice()) {
            // Interpret the remaining bytes as body data.
            htp_warn!(
                self.logger,
                HtpLogCode::RESPONSE_BODY_UNEXPECTED,
                "Unexpected response body"
            );
            return self.response_process_body_data(Some(data.as_slice()));
        }
        // The data looks like the start of the next response; restore
        // the previously buffered portion and unread the line.
        self.response_buf.add(&data.as_slice()[0..buf_len]);
        if self.response_curr_data.position() < data.len() as u64 {
            self.response_curr_data.set_position(0);
        } else {
            self.response_curr_data
                .seek(SeekFrom::Current(-(data.len() as i64)))?;
        }
        self.state_response_complete()
    }

    /// Passes one slice of response body data through the decompressor
    /// (when active) and on to the body data hooks. None signals the end
    /// of the body.
    pub fn response_process_body_data(&mut self, data: Option<&[u8]>) -> Result<()> {
        if let Some(d) = data {
            if d.is_empty() {
                return Ok(());
            }
            let tx = self.response_mut_ok()?;
            tx.response_message_len = tx.response_message_len.wrapping_add(d.len() as i64);
        }
        let processing = self.response_mut_ok()?.response_content_encoding_processing;
        match processing {
            HtpContentEncoding::GZIP | HtpContentEncoding::DEFLATE => {
                let mut decompressor = self.response_mut_ok()?.response_decompressor.take();
                let decoded = match &mut decompressor {
                    Some(decompressor) => match data {
                        Some(d) => decompressor.feed(d),
                        None => decompressor.finish(),
                    },
                    None => Ok(data.map(|d| d.to_vec()).unwrap_or_default()),
                };
                match decoded {
                    Ok(decoded) => {
                        self.response_mut_ok()?.response_decompressor = decompressor;
                        if !decoded.is_empty() {
                            let tx = self.response_mut_ok()?;
                            tx.response_entity_len =
                                tx.response_entity_len.wrapping_add(decoded.len() as i64);
                            self.response_run_hook_body_data(&decoded)?;
                        }
                    }
                    Err(_) => {
                        // Decompression failed; report it once and pass
                        // the remaining data through unchanged.
                        htp_warn!(
                            self.logger,
                            HtpLogCode::RESPONSE_DECOMPRESSION_FAILED,
                            "Decompression of the response body failed"
                        );
                        let tx = self.response_mut_ok()?;
                        tx.response_content_encoding_processing = HtpContentEncoding::NONE;
                        tx.response_decompressor = None;
                        if let Some(d) = data {
                            tx.response_entity_len =
                                tx.response_entity_len.wrapping_add(d.len() as i64);
                            self.response_run_hook_body_data(d)?;
                        }
                    }
                }
            }
            HtpContentEncoding::NONE => {
                if let Some(d) = data {
                    let tx = self.response_mut_ok()?;
                    tx.response_entity_len = tx.response_entity_len.wrapping_add(d.len() as i64);
                    self.response_run_hook_body_data(d)?;
                }
            }
        }
        Ok(())
    }

    /// Runs the RESPONSE_BODY_DATA hooks: transaction-level first, then
    /// configuration-level.
    fn response_run_hook_body_data(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let tx = self.response_mut_ok()?;
        let tx_hook = tx.hook_response_body_data.clone();
        tx_hook.run_all(&mut Data::new(tx, Some(data), false))?;
        let cfg_hook = self.cfg.hook_response_body_data.clone();
        let tx = self.response_mut_ok()?;
        cfg_hook.run_all(&mut Data::new(tx, Some(data), false))?;
        Ok(())
    }

    /// Process a chunk of outbound (server or response) data.
    pub fn response_data(
        &mut self,
        chunk: &[u8],
        timestamp: Option<OffsetDateTime>,
    ) -> HtpStreamState {
        if self.response_status == HtpStreamState::STOP {
            htp_info!(
                self.logger,
                HtpLogCode::PARSER_STATE_ERROR,
                "Outbound parser is in STOP state"
            );
            return HtpStreamState::STOP;
        }
        if self.response_status == HtpStreamState::ERROR {
            htp_error!(
                self.logger,
                HtpLogCode::PARSER_STATE_ERROR,
                "Outbound parser is in ERROR state"
            );
            return HtpStreamState::ERROR;
        }
        if chunk.is_empty() && self.response_status != HtpStreamState::CLOSED {
            htp_error!(
                self.logger,
                HtpLogCode::ZERO_LENGTH_DATA_CHUNKS,
                "Zero-length data chunks are not allowed"
            );
            return HtpStreamState::CLOSED;
        }
        if timestamp.is_some() {
            self.response_timestamp = timestamp;
        }
        self.response_curr_data = Cursor::new(chunk.to_vec());
        self.response_current_receiver_offset = 0;
        self.conn.track_outbound_data(chunk.len());
        if self.response_status == HtpStreamState::TUNNEL {
            return HtpStreamState::TUNNEL;
        }
        loop {
            let mut rc = self.handle_response_state(chunk);
            if rc.is_ok() {
                if self.response_status == HtpStreamState::TUNNEL {
                    return HtpStreamState::TUNNEL;
                }
                rc = self.response_handle_state_change();
            }
            match rc {
                Ok(_) => {}
                Err(HtpStatus::DATA) | Err(HtpStatus::DATA_BUFFER) => {
                    // Ignore result.
                    let _ = self.response_receiver_send_data(false);
                    if self.response_status != HtpStreamState::CLOSED {
                        self.response_status = HtpStreamState::DATA;
                    }
                    return HtpStreamState::DATA;
                }
                Err(HtpStatus::DATA_OTHER) => {
                    if self.response_curr_data.position()
                        >= self.response_curr_data.get_ref().len() as u64
                    {
                        self.response_status = HtpStreamState::DATA;
                        return HtpStreamState::DATA;
                    }
                    self.response_status = HtpStreamState::DATA_OTHER;
                    return HtpStreamState::DATA_OTHER;
                }
                Err(HtpStatus::STOP) => {
                    self.response_status = HtpStreamState::STOP;
                    return HtpStreamState::STOP;
                }
                Err(_) => {
                    self.response_status = HtpStreamState::ERROR;
                    return HtpStreamState::ERROR;
                }
            }
        }
    }
}
