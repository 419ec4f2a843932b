use crate::{
    bstr::Bstr,
    config::Config,
    error::Result,
    hook::FileDataHook,
    parsers::parse_content_type,
    table::Table,
    transaction::{Header, Headers},
    util::{is_lws, is_space, is_token, take_until_no_case, File, FlagOperations, HtpFileSource},
    HtpStatus,
};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take, take_until, take_while, take_while1},
    character::complete::char,
    combinator::{map, not, opt, peek},
    multi::fold_many1,
    sequence::tuple,
    IResult,
};
use std::cmp::Ordering;

/// Multipart parsing and payload anomaly flags.
pub struct MultipartFlags;

impl MultipartFlags {
    /// Seen a LF line in the payload. LF lines are not allowed, but some
    /// clients do use them and some backends do accept them. Mixing LF
    /// and CRLF lines within one payload is unusual.
    pub const LF_LINE: u64 = 0x0001;
    /// Seen a CRLF line in the payload. This is normal and expected.
    pub const CRLF_LINE: u64 = 0x0002;
    /// Seen LWS after a boundary instance in the body. Unusual.
    pub const BBOUNDARY_LWS_AFTER: u64 = 0x0004;
    /// Seen non-LWS content after a boundary instance in the body.
    /// Highly unusual.
    pub const BBOUNDARY_NLWS_AFTER: u64 = 0x0008;
    /// Payload has a preamble part. Might not be that unusual.
    pub const HAS_PREAMBLE: u64 = 0x0010;
    /// Payload has an epilogue part. Unusual.
    pub const HAS_EPILOGUE: u64 = 0x0020;
    /// The last boundary was seen in the payload. Its absence means the
    /// payload is not well formed, usually because the client gave up or
    /// the connection was interrupted.
    pub const SEEN_LAST_BOUNDARY: u64 = 0x0040;
    /// There was a part after the last boundary. This is highly
    /// irregular and indicative of evasion.
    pub const PART_AFTER_LAST_BOUNDARY: u64 = 0x0080;
    /// The payload ends abruptly, without proper termination.
    pub const INCOMPLETE: u64 = 0x0100;
    /// The boundary in the Content-Type header is invalid.
    pub const HBOUNDARY_INVALID: u64 = 0x0200;
    /// The boundary in the Content-Type header is unusual. This may mean
    /// that evasion is attempted, but it could also mean that we have
    /// encountered a client that does not do things the way it should.
    pub const HBOUNDARY_UNUSUAL: u64 = 0x0400;
    /// The boundary in the Content-Type header is quoted. This is very
    /// unusual, and may be indicative of an evasion attempt.
    pub const HBOUNDARY_QUOTED: u64 = 0x0800;
    /// Header folding was used in part headers. Very unusual.
    pub const PART_HEADER_FOLDING: u64 = 0x1000;
    /// A part of unknown type was encountered, which probably means that
    /// the part is lacking a Content-Disposition header, or that the
    /// header is invalid. Highly unusual.
    pub const PART_UNKNOWN: u64 = 0x2000;
    /// There was a repeated part header, possibly in an attempt to
    /// confuse the parser. Very unusual.
    pub const PART_HEADER_REPEATED: u64 = 0x4000;
    /// Unknown part header encountered.
    pub const PART_HEADER_UNKNOWN: u64 = 0x8000;
    /// Invalid part header encountered.
    pub const PART_HEADER_INVALID: u64 = 0x10000;
    /// The Content-Disposition header is missing its form-data token.
    pub const CD_TYPE_INVALID: u64 = 0x20000;
    /// A Content-Disposition parameter appeared more than once.
    pub const CD_PARAM_REPEATED: u64 = 0x40000;
    /// Unknown Content-Disposition parameter.
    pub const CD_PARAM_UNKNOWN: u64 = 0x80000;
    /// Invalid Content-Disposition syntax.
    pub const CD_SYNTAX_INVALID: u64 = 0x100000;
    /// There is an abruptly terminated part. Besides payload truncation,
    /// this also happens when a boundary arrives before any part data.
    pub const PART_INCOMPLETE: u64 = 0x200000;
    /// A NUL byte was seen in a part header area.
    pub const NUL_BYTE: u64 = 0x400000;
    /// A collection of flags that all indicate an invalid C-D header.
    pub const CD_INVALID: u64 = Self::CD_TYPE_INVALID
        | Self::CD_PARAM_REPEATED
        | Self::CD_PARAM_UNKNOWN
        | Self::CD_SYNTAX_INVALID;
    /// A collection of flags that all indicate an invalid part.
    pub const PART_INVALID: u64 = Self::CD_INVALID
        | Self::NUL_BYTE
        | Self::PART_UNKNOWN
        | Self::PART_HEADER_REPEATED
        | Self::PART_INCOMPLETE
        | Self::PART_HEADER_UNKNOWN
        | Self::PART_HEADER_INVALID;
    /// A collection of flags that all indicate an invalid payload.
    pub const INVALID: u64 = Self::PART_INVALID
        | Self::PART_AFTER_LAST_BOUNDARY
        | Self::INCOMPLETE
        | Self::HBOUNDARY_INVALID;
    /// A collection of flags that all indicate an unusual payload.
    pub const UNUSUAL: u64 = Self::INVALID
        | Self::PART_HEADER_FOLDING
        | Self::BBOUNDARY_NLWS_AFTER
        | Self::HAS_EPILOGUE
        | Self::HBOUNDARY_UNUSUAL
        | Self::HBOUNDARY_QUOTED;
    /// As UNUSUAL, with a low sensitivity to irregularities.
    pub const UNUSUAL_PARANOID: u64 = Self::UNUSUAL
        | Self::LF_LINE
        | Self::BBOUNDARY_LWS_AFTER
        | Self::HAS_PREAMBLE;
}

/// The type of one multipart part.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HtpMultipartType {
    /// Unknown part.
    UNKNOWN,
    /// Text (parameter) part.
    TEXT,
    /// File part.
    FILE,
    /// Free-text part before the first boundary.
    PREAMBLE,
    /// Free-text part after the last boundary.
    EPILOGUE,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum HtpMultipartState {
    /// Initial state, before the boundary is initialized.
    INIT,
    /// Processing data, waiting for a new line (which might indicate a
    /// new boundary).
    DATA,
    /// Testing a potential boundary.
    BOUNDARY,
    /// Checking the byte after the boundary for the first dash of a
    /// closing delimiter.
    BOUNDARY_IS_LAST2,
    /// Checking for the second dash.
    BOUNDARY_IS_LAST1,
    /// Consuming linear whitespace after a boundary.
    BOUNDARY_EAT_LWS,
    /// A CR was seen while consuming post-boundary whitespace.
    BOUNDARY_EAT_LWS_CR,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum HtpMultipartMode {
    /// When in line mode, the parser is handling part headers.
    LINE,
    /// When in data mode, the parser is consuming part data.
    DATA,
}

/// One part of a multipart payload.
pub struct Part {
    /// Part type.
    pub part_type: HtpMultipartType,
    /// Raw part length (headers and data).
    pub len: usize,
    /// Part name, from the Content-Disposition header.
    pub name: Option<Bstr>,
    /// Part value. The contents depend on the type of the part: None for
    /// files, the complete part contents for preamble and epilogue parts
    /// (they have no headers), and data only (headers excluded) for text
    /// and unknown parts.
    pub value: Option<Bstr>,
    /// Part content type, from the Content-Type header.
    pub content_type: Option<Bstr>,
    /// Part headers, using the header name as the key.
    pub headers: Headers,
    /// File information, available only for FILE parts.
    pub file: Option<File>,
}

impl Default for Part {
    fn default() -> Self {
        Self {
            part_type: HtpMultipartType::UNKNOWN,
            len: 0,
            name: None,
            value: None,
            content_type: None,
            headers: Table::with_capacity(4),
            file: None,
        }
    }
}

/// Holds information related to one multipart body.
pub struct Multipart {
    /// The boundary matching pattern: CRLF, two dashes, then the
    /// boundary value.
    pub boundary: Vec<u8>,
    /// Pattern length.
    pub boundary_len: usize,
    /// How many boundaries were seen?
    pub boundary_count: i32,
    /// The parts, in the order in which they appeared in the body.
    pub parts: Vec<Part>,
    /// Parsing flags (MultipartFlags namespace).
    pub flags: u64,
}

/// A parser for multipart/form-data request bodies. The parser consists
/// of two layers: the outer layer finds part boundaries (and in doing so
/// splits the input into lines), while the inner layer assembles part
/// headers and part data.
pub struct MultipartParser {
    /// The parsed body.
    pub multipart: Multipart,
    extract_files: bool,
    extract_limit: u32,
    extract_dir: String,
    file_count: u32,
    boundary_case_insensitive: bool,
    file_data_hook: FileDataHook,

    parser_state: HtpMultipartState,
    /// Progress through the boundary pattern; a match is complete when
    /// this reaches the pattern length.
    boundary_match_pos: usize,
    /// Index of the part currently being built.
    current_part: Option<usize>,
    current_part_mode: HtpMultipartMode,
    /// Bytes speculatively held aside while a potential boundary that
    /// spans input chunks is examined. On a match the bytes are
    /// discarded; on a mismatch they are replayed as part data.
    boundary_pieces: Bstr,
    /// Collects fragments of a part header line that arrived in
    /// separate input chunks.
    part_header_pieces: Bstr,
    /// The most recent complete part header line, pending the folding
    /// decision.
    pending_header_line: Option<Bstr>,
    /// Collects part data until the part is complete.
    part_data_pieces: Bstr,
    /// The offset of the boundary candidate's line ending, relative to
    /// the first unprocessed byte of the chunk in which it was seen.
    boundary_candidate_pos: usize,
    /// A CR at the very end of an input chunk is withheld until the next
    /// chunk shows whether it begins a CRLF-boundary sequence.
    cr_aside: bool,
    /// When set, the parser no longer owns the names and values of TEXT
    /// parts; they have been handed to the transaction.
    pub gave_up_data: bool,
}

impl MultipartParser {
    /// Creates a parser for the given boundary value.
    pub fn new(cfg: &Config, boundary: &[u8], flags: u64) -> Self {
        let mut pattern = Vec::with_capacity(boundary.len() + 4);
        pattern.extend_from_slice(b"\r\n--");
        pattern.extend_from_slice(boundary);
        if cfg.multipart_boundary_case_insensitive {
            pattern.make_ascii_lowercase();
        }
        let boundary_len = pattern.len();
        Self {
            multipart: Multipart {
                boundary: pattern,
                boundary_len,
                boundary_count: 0,
                parts: Vec::with_capacity(8),
                flags,
            },
            extract_files: cfg.extract_request_files,
            extract_limit: cfg.extract_request_files_limit,
            extract_dir: cfg.tmpdir.clone(),
            file_count: 0,
            boundary_case_insensitive: cfg.multipart_boundary_case_insensitive,
            file_data_hook: cfg.hook_request_file_data.clone(),
            // We start in boundary-matching mode, at pattern position 2,
            // so that the initial boundary is recognized without a
            // preceding CRLF.
            parser_state: HtpMultipartState::BOUNDARY,
            boundary_match_pos: 2,
            current_part: None,
            current_part_mode: HtpMultipartMode::LINE,
            boundary_pieces: Bstr::new(),
            part_header_pieces: Bstr::new(),
            pending_header_line: None,
            part_data_pieces: Bstr::new(),
            boundary_candidate_pos: 0,
            cr_aside: false,
            gave_up_data: false,
        }
    }

    fn boundary_byte_matches(&self, input: u8, pos: usize) -> bool {
        let expected = self.multipart.boundary[pos];
        if self.boundary_case_insensitive {
            input.to_ascii_lowercase() == expected
        } else {
            input == expected
        }
    }

    /// Parses one chunk of multipart data. Call as many times as
    /// necessary, in stream order, until all body data is consumed.
    pub fn parse(&mut self, input: &[u8]) -> Result<()> {
        let len = input.len();
        // The current read position within the input.
        let mut pos: usize = 0;
        // The position of the first unprocessed byte: the input is split
        // into smaller ranges according to their purpose, and startpos
        // advances as each range is handed off.
        let mut startpos: usize = 0;
        // The position just after the line ending that precedes a
        // boundary candidate. On a mismatch, processing resumes here.
        let mut data_return_pos: usize = 0;
        'outer: while pos < len {
            match self.parser_state {
                HtpMultipartState::INIT => {
                    // The boundary was never initialized.
                    return Err(HtpStatus::ERROR);
                }
                HtpMultipartState::DATA => {
                    while pos < len {
                        if input[pos] == b'\r' {
                            if pos + 1 == len {
                                // A CR as the last byte of the input. We
                                // process everything before it as data
                                // and withhold the CR itself: it may be
                                // the start of a boundary sequence.
                                pos += 1;
                                self.cr_aside = true;
                            } else if input[pos + 1] == b'\n' {
                                // A CRLF line ending; prepare to switch
                                // to boundary testing.
                                pos += 2;
                                self.multipart.flags.set(MultipartFlags::CRLF_LINE);
                                data_return_pos = pos;
                                self.boundary_candidate_pos = pos - startpos;
                                self.boundary_match_pos = 2;
                                self.parser_state = HtpMultipartState::BOUNDARY;
                                continue 'outer;
                            } else {
                                // Not a line ending; the withheld CR, if
                                // any, is ordinary data.
                                pos += 1;
                                self.cr_aside = false;
                            }
                        } else if input[pos] == b'\n' {
                            // A LF-terminated line.
                            pos += 1;
                            if self.cr_aside {
                                self.multipart.flags.set(MultipartFlags::CRLF_LINE);
                            } else {
                                self.multipart.flags.set(MultipartFlags::LF_LINE);
                            }
                            data_return_pos = pos;
                            self.boundary_candidate_pos = pos - startpos;
                            self.boundary_match_pos = 2;
                            self.parser_state = HtpMultipartState::BOUNDARY;
                            continue 'outer;
                        } else {
                            pos += 1;
                            // The previous chunk ended in a CR that we
                            // now know is not part of a line ending.
                            if self.cr_aside {
                                self.handle_data(b"\r", false)?;
                                self.cr_aside = false;
                            }
                        }
                    }
                    // Out of input; hand off the data range, holding
                    // back a trailing CR.
                    let end = pos - (self.cr_aside as usize);
                    if end > startpos {
                        let range = &input[startpos..end];
                        self.handle_data(range, false)?;
                    }
                    return Ok(());
                }
                HtpMultipartState::BOUNDARY => {
                    while pos < len {
                        if !self.boundary_byte_matches(input[pos], self.boundary_match_pos) {
                            // Mismatch. Replay the bytes held aside, then
                            // return to where data parsing left off.
                            self.process_aside(false)?;
                            if self.current_part_mode == HtpMultipartMode::LINE {
                                // In line mode, the line is processed.
                                let line = &input[startpos..data_return_pos];
                                self.handle_data(line, true)?;
                                startpos = data_return_pos;
                            } else {
                                // In data mode, we go back to where we
                                // left off.
                                pos = data_return_pos;
                            }
                            self.parser_state = HtpMultipartState::DATA;
                            continue 'outer;
                        }
                        pos += 1;
                        self.boundary_match_pos += 1;
                        if self.boundary_match_pos != self.multipart.boundary_len {
                            continue;
                        }
                        // Boundary match. Anything stored aside belongs
                        // to the boundary and is discarded.
                        self.process_aside(true)?;
                        // Process the data preceding the boundary in the
                        // current chunk, with its line ending removed.
                        let mut dlen = data_return_pos - startpos;
                        if dlen > 0 && input[startpos + dlen - 1] == b'\n' {
                            dlen -= 1;
                        }
                        if dlen > 0 && input[startpos + dlen - 1] == b'\r' {
                            dlen -= 1;
                        }
                        let range = &input[startpos..startpos + dlen];
                        self.handle_data(range, true)?;
                        self.multipart.boundary_count += 1;
                        if self
                            .multipart
                            .flags
                            .is_set(MultipartFlags::SEEN_LAST_BOUNDARY)
                        {
                            self.multipart
                                .flags
                                .set(MultipartFlags::PART_AFTER_LAST_BOUNDARY);
                        }
                        // Close the current part, if any.
                        self.handle_boundary()?;
                        // Is this the last boundary in the payload?
                        self.parser_state = HtpMultipartState::BOUNDARY_IS_LAST2;
                        continue 'outer;
                    }
                    // Out of input mid-match; store the unprocessed range
                    // until we learn whether this is a boundary.
                    self.boundary_pieces.add(&input[startpos..len]);
                    return Ok(());
                }
                HtpMultipartState::BOUNDARY_IS_LAST2 => {
                    // A dash after the boundary may start the closing
                    // delimiter.
                    if input[pos] == b'-' {
                        pos += 1;
                        self.parser_state = HtpMultipartState::BOUNDARY_IS_LAST1;
                    } else {
                        // Not the last boundary. Do not advance; the next
                        // state examines this byte.
                        self.parser_state = HtpMultipartState::BOUNDARY_EAT_LWS;
                    }
                }
                HtpMultipartState::BOUNDARY_IS_LAST1 => {
                    if input[pos] == b'-' {
                        // This is indeed the last boundary in the payload.
                        pos += 1;
                        self.multipart
                            .flags
                            .set(MultipartFlags::SEEN_LAST_BOUNDARY);
                        self.parser_state = HtpMultipartState::BOUNDARY_EAT_LWS;
                    } else {
                        // One dash but not two; note the stray byte and
                        // consume the rest of the boundary line.
                        self.multipart
                            .flags
                            .set(MultipartFlags::BBOUNDARY_NLWS_AFTER);
                        self.parser_state = HtpMultipartState::BOUNDARY_EAT_LWS;
                    }
                }
                HtpMultipartState::BOUNDARY_EAT_LWS => {
                    if input[pos] == b'\r' {
                        pos += 1;
                        self.parser_state = HtpMultipartState::BOUNDARY_EAT_LWS_CR;
                    } else if input[pos] == b'\n' {
                        // A LF line ending closes the boundary line; data
                        // bytes follow.
                        pos += 1;
                        startpos = pos;
                        self.multipart.flags.set(MultipartFlags::LF_LINE);
                        self.parser_state = HtpMultipartState::DATA;
                    } else if is_lws(input[pos]) {
                        // Linear whitespace is allowed here.
                        self.multipart
                            .flags
                            .set(MultipartFlags::BBOUNDARY_LWS_AFTER);
                        pos += 1;
                    } else {
                        // Unexpected byte; consume, but remain in the
                        // same state.
                        self.multipart
                            .flags
                            .set(MultipartFlags::BBOUNDARY_NLWS_AFTER);
                        pos += 1;
                    }
                }
                HtpMultipartState::BOUNDARY_EAT_LWS_CR => {
                    if input[pos] == b'\n' {
                        // A CRLF line ending closes the boundary line.
                        pos += 1;
                        startpos = pos;
                        self.multipart.flags.set(MultipartFlags::CRLF_LINE);
                        self.parser_state = HtpMultipartState::DATA;
                    } else {
                        // Not a line ending; reexamine this byte.
                        self.multipart
                            .flags
                            .set(MultipartFlags::BBOUNDARY_NLWS_AFTER);
                        self.parser_state = HtpMultipartState::BOUNDARY_EAT_LWS;
                    }
                }
            }
        }
        Ok(())
    }

    /// Finalizes parsing after the last chunk of body data.
    pub fn finalize(&mut self) -> Result<()> {
        if self.current_part.is_some() {
            // Process buffered data, if any.
            self.process_aside(false)?;
            let index = self.current_part.unwrap();
            self.part_finalize_data(index)?;
            // Ending abruptly is fine in the epilogue, but nowhere else.
            if self.multipart.parts[index].part_type != HtpMultipartType::EPILOGUE {
                self.multipart.flags.set(MultipartFlags::INCOMPLETE);
            }
        }
        self.boundary_pieces.clear();
        Ok(())
    }

    /// Replays or discards bytes that were set aside while a potential
    /// boundary was examined. The stored data can contain up to one
    /// line: when a boundary matched we must not leak the line ending or
    /// the partial boundary, and in line mode the first stored range is
    /// a part-header line that still needs line treatment.
    fn process_aside(&mut self, matched: bool) -> Result<()> {
        if matched || self.current_part_mode == HtpMultipartMode::LINE {
            if !matched && self.cr_aside {
                // No boundary after all; the withheld CR is part data.
                self.handle_data(b"\r", false)?;
            }
            self.cr_aside = false;
            if !self.boundary_pieces.is_empty() {
                let pieces = std::mem::take(&mut self.boundary_pieces);
                let split = std::cmp::min(self.boundary_candidate_pos, pieces.len());
                let (first, rest) = pieces.as_slice().split_at(split);
                if !matched {
                    // In line mode, line endings may flow through.
                    self.handle_data(first, true)?;
                    self.handle_data(rest, false)?;
                } else {
                    // The line ending belongs to the boundary; the rest
                    // of the stored bytes are the boundary itself.
                    let mut flen = first.len();
                    if flen > 0 && first[flen - 1] == b'\n' {
                        flen -= 1;
                    }
                    if flen > 0 && first[flen - 1] == b'\r' {
                        flen -= 1;
                    }
                    self.handle_data(&first[..flen], false)?;
                }
            }
        } else {
            // Data mode and no match: the withheld CR and all stored
            // pieces are part data.
            if self.cr_aside {
                self.handle_data(b"\r", false)?;
                self.cr_aside = false;
            }
            if !self.boundary_pieces.is_empty() {
                let pieces = std::mem::take(&mut self.boundary_pieces);
                self.handle_data(pieces.as_slice(), false)?;
            }
        }
        Ok(())
    }

    /// Routes a range of body bytes to the current part, creating a new
    /// part when none is active.
    fn handle_data(&mut self, data: &[u8], is_line: bool) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.current_part.is_none() {
            let mut part = Part::default();
            if self.multipart.boundary_count == 0 {
                // No boundary seen yet; this is the preamble.
                part.part_type = HtpMultipartType::PREAMBLE;
                self.multipart.flags.set(MultipartFlags::HAS_PREAMBLE);
                self.current_part_mode = HtpMultipartMode::DATA;
            } else {
                // A part that follows a boundary starts with headers.
                self.current_part_mode = HtpMultipartMode::LINE;
            }
            self.part_data_pieces.clear();
            self.part_header_pieces.clear();
            self.multipart.parts.push(part);
            self.current_part = Some(self.multipart.parts.len() - 1);
        }
        self.part_handle_data(data, is_line)
    }

    /// Closes the current part on a boundary match.
    fn handle_boundary(&mut self) -> Result<()> {
        if let Some(index) = self.current_part.take() {
            self.part_finalize_data(index)?;
            self.current_part_mode = HtpMultipartMode::LINE;
        }
        Ok(())
    }

    /// Handles data belonging to the current part, in line mode (part
    /// headers) or data mode (part payload).
    fn part_handle_data(&mut self, data: &[u8], is_line: bool) -> Result<()> {
        let index = self.current_part.ok_or(HtpStatus::ERROR)?;
        // Keep track of the raw part length.
        self.multipart.parts[index].len += data.len();
        // A part that appears after the last boundary might be the
        // epilogue or it might be an evasion attempt; keep all its bytes
        // so it can be reported either way.
        let after_last = self.multipart.flags.is_set(MultipartFlags::SEEN_LAST_BOUNDARY)
            && self.multipart.parts[index].part_type == HtpMultipartType::UNKNOWN;
        if after_last {
            self.part_data_pieces.add(data);
        }
        if self.current_part_mode == HtpMultipartMode::LINE {
            if !is_line {
                // Not yet the end of the line; keep the fragment.
                self.part_header_pieces.add(data);
                return Ok(());
            }
            // Combine fragments into the complete line.
            let assembled;
            let line: &[u8] = if self.part_header_pieces.is_empty() {
                data
            } else {
                self.part_header_pieces.add(data);
                assembled = std::mem::take(&mut self.part_header_pieces);
                assembled.as_slice()
            };
            // Ignore the line ending.
            let mut end = line.len();
            if end > 0 && line[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && line[end - 1] == b'\r' {
                end -= 1;
            }
            let line = &line[..end];
            if line.is_empty() {
                // An empty line concludes the part headers.
                if let Some(pending) = self.pending_header_line.take() {
                    self.parse_part_header(index, pending.as_slice())?;
                }
                self.process_part_headers(index)?;
                self.current_part_mode = HtpMultipartMode::DATA;
                self.part_header_pieces.clear();
            } else if self.pending_header_line.is_none() {
                self.pending_header_line = Some(Bstr::from(line));
            } else if line[0].is_ascii_whitespace() {
                // A folded line; attach it to the pending header.
                self.multipart
                    .flags
                    .set(MultipartFlags::PART_HEADER_FOLDING);
                if let Some(pending) = &mut self.pending_header_line {
                    pending.add(line);
                }
            } else {
                // A new header line; the pending one is complete.
                let pending = self
                    .pending_header_line
                    .replace(Bstr::from(line))
                    .ok_or(HtpStatus::ERROR)?;
                self.parse_part_header(index, pending.as_slice())?;
            }
            Ok(())
        } else {
            match self.multipart.parts[index].part_type {
                HtpMultipartType::FILE => {
                    // Send to the file data callbacks and, optionally,
                    // to disk.
                    let hook = self.file_data_hook.clone();
                    if let Some(file) = &mut self.multipart.parts[index].file {
                        file.write(data)?;
                        file.handle_file_data(&hook, Some(data))?;
                    }
                    Ok(())
                }
                _ => {
                    // Keep a copy of the data in memory; the postlude
                    // case stored it above already.
                    if !after_last {
                        self.part_data_pieces.add(data);
                    }
                    Ok(())
                }
            }
        }
    }

    /// Finalizes the data of one part, determining its type and
    /// transferring its accumulated value.
    fn part_finalize_data(&mut self, index: usize) -> Result<()> {
        // Is this the epilogue, or a rogue part after the last boundary?
        if self
            .multipart
            .flags
            .is_set(MultipartFlags::SEEN_LAST_BOUNDARY)
        {
            if self.multipart.parts[index].part_type == HtpMultipartType::UNKNOWN {
                // Assume the unknown part after the last boundary is the
                // epilogue.
                self.multipart.parts[index].part_type = HtpMultipartType::EPILOGUE;
                // Multiple epilogues are not allowed.
                if self.multipart.flags.is_set(MultipartFlags::HAS_EPILOGUE) {
                    self.multipart.flags.set(MultipartFlags::PART_UNKNOWN);
                }
                self.multipart.flags.set(MultipartFlags::HAS_EPILOGUE);
            } else {
                self.multipart
                    .flags
                    .set(MultipartFlags::PART_AFTER_LAST_BOUNDARY);
            }
        }
        // A part that never completed its headers ended prematurely.
        if self.multipart.parts[index].part_type != HtpMultipartType::EPILOGUE
            && self.current_part_mode != HtpMultipartMode::DATA
        {
            self.multipart.flags.set(MultipartFlags::PART_INCOMPLETE);
        }
        // A part without a usable Content-Disposition has no type.
        if self.multipart.parts[index].part_type == HtpMultipartType::UNKNOWN {
            self.multipart.flags.set(MultipartFlags::PART_UNKNOWN);
        }
        if self.multipart.parts[index].part_type == HtpMultipartType::FILE {
            // Notify the callbacks about the end of the file.
            let hook = self.file_data_hook.clone();
            if let Some(file) = &mut self.multipart.parts[index].file {
                file.handle_file_data(&hook, None)?;
            }
        } else if !self.part_data_pieces.is_empty() {
            let value = std::mem::take(&mut self.part_data_pieces);
            self.multipart.parts[index].value = Some(value);
        }
        Ok(())
    }

    /// Processes the completed part headers: Content-Disposition first,
    /// Content-Type second, then the part type decision.
    fn process_part_headers(&mut self, index: usize) -> Result<()> {
        if self.parse_content_disposition(index) == Err(HtpStatus::ERROR) {
            return Err(HtpStatus::ERROR);
        }
        let ct_value = self.multipart.parts[index]
            .headers
            .get_nocase_nozero("content-type")
            .map(|(_, header)| header.value.clone());
        if let Some(ct_value) = ct_value {
            if let Ok(content_type) = parse_content_type(ct_value.as_slice()) {
                self.multipart.parts[index].content_type = Some(content_type);
            }
        }
        let part = &mut self.multipart.parts[index];
        if part.file.is_some() {
            // A filename parameter makes this a file part.
            part.part_type = HtpMultipartType::FILE;
            if self.extract_files && self.file_count < self.extract_limit {
                if let Some(file) = &mut part.file {
                    file.create(&self.extract_dir)?;
                }
                self.file_count += 1;
            }
        } else if part.name.is_some() {
            // A name parameter alone makes this a text part.
            part.part_type = HtpMultipartType::TEXT;
            self.part_data_pieces.clear();
        }
        Ok(())
    }

    /// Parses the Content-Disposition part header, populating the part
    /// name and file information.
    ///
    /// Returns OK on success, DECLINED when the header is absent or not
    /// usable, ERROR on fatal failure.
    fn parse_content_disposition(&mut self, index: usize) -> Result<()> {
        let value = match self.multipart.parts[index]
            .headers
            .get_nocase_nozero("content-disposition")
        {
            Some((_, header)) => header.value.clone(),
            None => {
                self.multipart.flags.set(MultipartFlags::PART_UNKNOWN);
                return Err(HtpStatus::DECLINED);
            }
        };
        match content_disposition(value.as_slice()) {
            Ok((_, params)) => {
                for (param_name, param_value) in params {
                    match param_name {
                        b"name" => {
                            // Check that we have not seen the name
                            // parameter already.
                            if self.multipart.parts[index].name.is_some() {
                                self.multipart
                                    .flags
                                    .set(MultipartFlags::CD_PARAM_REPEATED);
                                return Err(HtpStatus::DECLINED);
                            }
                            self.multipart.parts[index].name = Some(Bstr::from(param_value));
                        }
                        b"filename" => {
                            if self.multipart.parts[index].file.is_some() {
                                self.multipart
                                    .flags
                                    .set(MultipartFlags::CD_PARAM_REPEATED);
                                return Err(HtpStatus::DECLINED);
                            }
                            self.multipart.parts[index].file = Some(File::new(
                                HtpFileSource::MULTIPART,
                                Some(Bstr::from(param_value)),
                            ));
                        }
                        _ => {
                            self.multipart
                                .flags
                                .set(MultipartFlags::CD_PARAM_UNKNOWN);
                            return Err(HtpStatus::DECLINED);
                        }
                    }
                }
                Ok(())
            }
            Err(_) => {
                self.multipart
                    .flags
                    .set(MultipartFlags::CD_SYNTAX_INVALID);
                Err(HtpStatus::DECLINED)
            }
        }
    }

    /// Parses one part header line, merging it into the part's header
    /// table.
    fn parse_part_header(&mut self, index: usize, input: &[u8]) -> Result<()> {
        // NUL bytes are not allowed in part headers.
        if input.contains(&0) {
            self.multipart.flags.set(MultipartFlags::NUL_BYTE);
            return Ok(());
        }
        match part_header(input) {
            Ok((_, (name, value))) => {
                let header = Header::new(Bstr::from(name), Bstr::from(value));
                if header.name.cmp_nocase("content-disposition") != Ordering::Equal
                    && header.name.cmp_nocase("content-type") != Ordering::Equal
                {
                    self.multipart
                        .flags
                        .set(MultipartFlags::PART_HEADER_UNKNOWN);
                }
                let part = &mut self.multipart.parts[index];
                if let Some((_, existing)) = part.headers.get_nocase_mut(header.name.as_slice()) {
                    // Coalesce, and keep track of same-name headers.
                    existing.value.extend_from_slice(b", ");
                    existing.value.extend_from_slice(header.value.as_slice());
                    existing
                        .flags
                        .set(MultipartFlags::PART_HEADER_REPEATED);
                    self.multipart
                        .flags
                        .set(MultipartFlags::PART_HEADER_REPEATED);
                } else {
                    part.headers.add(header.name.clone(), header);
                }
                Ok(())
            }
            Err(_) => {
                // An unusable name and/or value.
                self.multipart
                    .flags
                    .set(MultipartFlags::PART_HEADER_INVALID);
                Ok(())
            }
        }
    }
}

/// Parses one part header line into a token name and a non-empty value.
/// Leading and trailing whitespace around the name is not allowed; the
/// value may carry surrounding whitespace.
fn part_header(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (value, (name, _, _, _)) = tuple((
        take_while1(is_token),
        tag(":"),
        take_while(is_space),
        peek(take(1usize)),
    ))(input)?;
    Ok((b"", (name, value)))
}

/// Extracts and decodes the parameters of a Content-Disposition header
/// following the form-data token. Parameter values must be quoted;
/// within quotes, backslash escapes a double quote or another backslash.
/// This is impossible to do fully correctly without a browser
/// personality because browsers disagree on the escaping of quotes and
/// backslashes in these values.
fn content_disposition_param() -> impl Fn(&[u8]) -> IResult<&[u8], (&[u8], Vec<u8>)> {
    move |input| {
        let (mut remaining_input, param_name) = map(
            tuple((
                take_while(|c: u8| c.is_ascii_whitespace()),
                char(';'),
                take_while(|c: u8| c.is_ascii_whitespace()),
                take_while(|c: u8| c != b'=' && !c.is_ascii_whitespace()),
                take_while(|c: u8| c.is_ascii_whitespace()),
                char('='),
                take_while(|c: u8| c.is_ascii_whitespace()),
                // The value must start with an opening quote.
                char('\"'),
            )),
            |(_, _, _, param_name, _, _, _, _)| param_name,
        )(input)?;
        // Unescape any escaped quotes/backslashes and find the closing
        // quote.
        let mut param_value = Vec::new();
        loop {
            let (rest, (value, escape)) = tuple((
                take_while(|c: u8| c != b'\"' && c != b'\\'),
                opt(tuple((char('\\'), alt((char('\"'), char('\\')))))),
            ))(remaining_input)?;
            remaining_input = rest;
            param_value.extend_from_slice(value);
            if let Some((_, escaped)) = escape {
                param_value.push(escaped as u8);
            } else {
                // Must end with a quote or the value is invalid.
                let (rest, _) = char('\"')(remaining_input)?;
                remaining_input = rest;
                break;
            }
        }
        Ok((remaining_input, (param_name, param_value)))
    }
}

/// Parses a complete Content-Disposition header value: the form-data
/// token followed by its parameters. Trailing data renders the header
/// invalid.
fn content_disposition(input: &[u8]) -> IResult<&[u8], Vec<(&[u8], Vec<u8>)>> {
    map(
        tuple((
            tag("form-data"),
            fold_many1(
                tuple((
                    content_disposition_param(),
                    take_while(|c: u8| c.is_ascii_whitespace()),
                    // Multiple header values may have been folded with a
                    // comma; accept a repeated form-data token.
                    opt(tuple((
                        tag(","),
                        take_while(|c: u8| c.is_ascii_whitespace()),
                        tag("form-data"),
                    ))),
                    take_while(|c: u8| c.is_ascii_whitespace()),
                )),
                Vec::new,
                |mut acc: Vec<(&[u8], Vec<u8>)>, (param, _, _, _)| {
                    acc.push(param);
                    acc
                },
            ),
            take_while(|c: u8| c.is_ascii_whitespace()),
            // Allow a trailing semicolon.
            opt(tag(";")),
            take_while(|c: u8| c.is_ascii_whitespace()),
            // There must be no data left over.
            not(take(1usize)),
        )),
        |(_, result, _, _, _, _)| result,
    )(input)
}

/// Attempts to locate and extract the boundary from a Content-Type
/// header value, together with the surrounding characters needed to
/// judge how unusual the declaration is.
#[allow(clippy::type_complexity)]
fn boundary(
    input: &[u8],
) -> IResult<
    &[u8],
    (
        &[u8],
        &[u8],
        &[u8],
        Option<char>,
        &[u8],
        Option<char>,
        &[u8],
        &[u8],
    ),
> {
    map(
        tuple((
            take_until_no_case(b"boundary"),
            tag_no_case("boundary"),
            take_while(is_space),
            take_until("="),
            tag("="),
            take_while(is_space),
            peek(opt(char('\"'))),
            alt((
                map(tuple((tag("\""), take_until("\""))), |(_, b)| b),
                map(
                    tuple((
                        take_while(|c: u8| c != b',' && c != b';' && !is_space(c)),
                        // Skip the delimiter if one was matched.
                        opt(alt((char(','), char(';')))),
                    )),
                    |(b, _)| b,
                ),
            )),
            peek(opt(char('\"'))),
            take_while(is_space),
            take_while(|c: u8| !is_space(c)),
        )),
        |(
            _,
            _,
            spaces_before_equal,
            chars_before_equal,
            _,
            spaces_after_equal,
            opening_quote,
            boundary,
            closing_quote,
            spaces_after_boundary,
            chars_after_boundary,
        )| {
            (
                spaces_before_equal,
                chars_before_equal,
                spaces_after_equal,
                opening_quote,
                boundary,
                closing_quote,
                spaces_after_boundary,
                chars_after_boundary,
            )
        },
    )(input)
}

/// Validates a multipart boundary according to RFC 1341: 1 to 70
/// characters from a restricted set. In practice browsers stick to
/// alphanumerics and dashes, so the other RFC-permitted characters are
/// reported as unusual.
fn validate_boundary(boundary: &[u8], flags: &mut u64) {
    if boundary.is_empty() || boundary.len() > 70 {
        flags.set(MultipartFlags::HBOUNDARY_INVALID);
    }
    for byte in boundary {
        if !byte.is_ascii_alphanumeric() && *byte != b'-' {
            match *byte as char {
                '\'' | '(' | ')' | '+' | '_' | ',' | '.' | '/' | ':' | '=' | '?' => {
                    // Allowed by the RFC, but uncommon.
                    flags.set(MultipartFlags::HBOUNDARY_UNUSUAL);
                }
                _ => {
                    flags.set(MultipartFlags::HBOUNDARY_INVALID);
                }
            }
        }
    }
}

/// Checks the Content-Type header for repeated boundary declarations or
/// a strangely-cased boundary parameter, both of which confuse some
/// parsers and so make good evasion vehicles.
fn validate_content_type(content_type: &[u8], flags: &mut u64) {
    if let Ok((_, (f, _))) = fold_many1(
        tuple((
            take_until_no_case(b"boundary"),
            tag_no_case("boundary"),
            take_until("="),
            tag("="),
        )),
        || (0u64, false),
        |(mut flags, seen_prev): (u64, bool), (_, boundary, _, _): (_, &[u8], _, _)| {
            for byte in boundary {
                if byte.is_ascii_uppercase() {
                    flags.set(MultipartFlags::HBOUNDARY_INVALID);
                    break;
                }
            }
            if seen_prev {
                // Seen multiple boundary declarations.
                flags.set(MultipartFlags::HBOUNDARY_INVALID);
            }
            (flags, true)
        },
    )(content_type)
    {
        flags.set(f);
    } else {
        // There must be at least one declaration.
        flags.set(MultipartFlags::HBOUNDARY_INVALID);
    }
}

/// Looks for a boundary in the supplied Content-Type request header.
/// Flags may be raised even when no boundary is returned; for example,
/// when there is an indication a boundary is present but it could not be
/// extracted, HBOUNDARY_INVALID is set.
pub fn find_boundary<'a>(content_type: &'a [u8], flags: &mut u64) -> Option<&'a [u8]> {
    // The MIME type is ignored for boundary extraction; looking for the
    // boundary parameter alone is more robust against invalid MIME type
    // evasion. The MIME type is still correlated, because browsers
    // always send it correctly.
    *flags = 0;
    if !content_type.starts_with(b"multipart/form-data;") {
        flags.set(MultipartFlags::HBOUNDARY_INVALID);
    }
    match boundary(content_type) {
        Ok((
            _,
            (
                spaces_before_equal,
                chars_before_equal,
                spaces_after_equal,
                opening_quote,
                boundary,
                closing_quote,
                spaces_after_boundary,
                chars_after_boundary,
            ),
        )) => {
            if !spaces_before_equal.is_empty()
                || !spaces_after_equal.is_empty()
                || opening_quote.is_some()
                || (chars_after_boundary.is_empty() && !spaces_after_boundary.is_empty())
            {
                // Whitespace around the equals sign, a quoted boundary,
                // or trailing whitespace: all unusual.
                flags.set(MultipartFlags::HBOUNDARY_UNUSUAL);
                if opening_quote.is_some() {
                    flags.set(MultipartFlags::HBOUNDARY_QUOTED);
                }
            }
            if !chars_before_equal.is_empty()
                || (opening_quote.is_some() && closing_quote.is_none())
                || (opening_quote.is_none() && closing_quote.is_some())
                || !chars_after_boundary.is_empty()
            {
                // Non-whitespace before the equals sign, an unbalanced
                // quote, or anything after the boundary: invalid.
                flags.set(MultipartFlags::HBOUNDARY_INVALID);
            }
            if boundary.is_empty() {
                flags.set(MultipartFlags::HBOUNDARY_INVALID);
                return None;
            }
            validate_boundary(boundary, flags);
            validate_content_type(content_type, flags);
            Some(boundary)
        }
        Err(_) => {
            flags.set(MultipartFlags::HBOUNDARY_INVALID);
            None
        }
    }
}

// Tests
