use crate::{
    bstr::Bstr,
    config::Config,
    connection::Connection,
    error::Result,
    hook::DataHook,
    log::Logger,
    transaction::{HtpRequestProgress, HtpResponseProgress, Transaction},
    util::{ConnectionFlags, File, FlagOperations},
    HtpStatus,
};
use std::io::Cursor;
use std::net::IpAddr;
use time::OffsetDateTime;

/// Enumerates the states the request and response parsers move through.
/// A state names the piece of work the parser performs the next time it
/// is handed bytes for that direction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(non_camel_case_types)]
pub enum State {
    /// Default state.
    NONE,
    /// Waiting for the first byte of the next message.
    IDLE,
    /// Consuming the request or response line.
    LINE,
    /// Deciding between header parsing and HTTP/0.9 shortcut.
    PROTOCOL,
    /// Consuming a header block.
    HEADERS,
    /// Deciding whether inbound parsing must wait for the response.
    CONNECT_CHECK,
    /// Suspended until the CONNECT response is seen.
    CONNECT_WAIT_RESPONSE,
    /// Deciding the body framing.
    BODY_DETERMINE,
    /// Consuming a chunk length line.
    BODY_CHUNKED_LENGTH,
    /// Consuming chunk payload.
    BODY_CHUNKED_DATA,
    /// Consuming the line ending that closes one chunk.
    BODY_CHUNKED_DATA_END,
    /// Consuming an identity request body of known length.
    BODY_IDENTITY,
    /// Consuming an identity response body of known length.
    BODY_IDENTITY_CL_KNOWN,
    /// Consuming an identity response body terminated by stream close.
    BODY_IDENTITY_STREAM_CLOSE,
    /// Wrapping up the message.
    FINALIZE,
    /// Discarding inbound data after an HTTP/0.9 exchange.
    IGNORE_DATA_AFTER_HTTP_0_9,
}

/// Enumerates all stream states. Each connection has two streams, one
/// inbound and one outbound. Their states are tracked separately.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HtpStreamState {
    /// Default stream state.
    NEW,
    /// The stream is open.
    OPEN,
    /// The stream is closed; only a finalizing zero-length chunk may
    /// still be fed.
    CLOSED,
    /// A fatal error has poisoned this direction.
    ERROR,
    /// The direction carries tunneled (opaque) data.
    TUNNEL,
    /// The other direction must make progress first.
    DATA_OTHER,
    /// A callback asked for this direction to stop.
    STOP,
    /// All supplied data was consumed; feed more.
    DATA,
}

/// Couples the request and response parsers over one connection,
/// dispatches inbound bytes to the request states and outbound bytes to
/// the response states, and owns the transaction lifecycle.
pub struct ConnectionParser {
    /// The configuration of this parser.
    pub cfg: Config,
    /// Log channel writer.
    pub logger: Logger,
    /// The connection structure associated with this parser.
    pub conn: Connection,

    /// Request parser status. Starts as NEW, moves to OPEN and later
    /// possibly to CLOSED, STOP, TUNNEL or ERROR.
    pub request_status: HtpStreamState,
    /// The time of the last request data chunk.
    pub request_timestamp: Option<OffsetDateTime>,
    /// The current request data chunk (a private copy) and the position
    /// of the next unread byte in it.
    pub request_curr_data: Cursor<Vec<u8>>,
    /// Marks the starting point of raw data within the inbound data
    /// chunk; raw data (complete header lines) between this offset and
    /// the read position is owed to the active data receiver hook.
    pub request_current_receiver_offset: u64,
    /// How many data chunks has the inbound stream seen?
    pub request_chunk_count: usize,
    /// The index of the first chunk used in the current request.
    pub request_chunk_request_index: usize,
    /// Buffer used when a line spans input chunks.
    pub request_buf: Bstr,
    /// The current, possibly folded, request header line.
    pub request_header: Option<Bstr>,
    /// Whether the pending request header was assembled from folded lines.
    pub request_header_folded: bool,
    /// The transaction the request parser is working on.
    request_tx: Option<usize>,
    /// The request body length declared in a valid Content-Length header.
    pub request_content_length: i64,
    /// Remaining request body bytes, when the length is known.
    pub request_body_data_left: i64,
    /// Remaining bytes of the current request body chunk.
    pub request_chunked_length: Option<u64>,
    /// Current request parser state.
    pub request_state: State,
    /// Previous request parser state, used to detect state changes.
    pub request_state_previous: State,
    /// The hook that should be receiving raw inbound connection data.
    pub request_data_receiver_hook: Option<DataHook>,
    /// On a PUT request, the file the body is streamed into.
    pub put_file: Option<File>,

    /// Response counter, used to match responses to requests.
    pub response_next_tx_index: usize,
    /// Response parser status.
    pub response_status: HtpStreamState,
    /// Signals that inbound parsing is waiting on this transaction's end.
    pub response_data_other_at_tx_end: bool,
    /// The time of the last response data chunk.
    pub response_timestamp: Option<OffsetDateTime>,
    /// The current response data chunk and read position.
    pub response_curr_data: Cursor<Vec<u8>>,
    /// As request_current_receiver_offset, for the outbound direction.
    pub response_current_receiver_offset: u64,
    /// Buffer used when an outbound line spans input chunks.
    pub response_buf: Bstr,
    /// The current, possibly folded, response header line.
    pub response_header: Option<Bstr>,
    /// Whether the pending response header was assembled from folded lines.
    pub response_header_folded: bool,
    /// The transaction the response parser is working on.
    response_tx: Option<usize>,
    /// The response body length declared in a valid Content-Length header.
    pub response_content_length: i64,
    /// Remaining response body bytes, when the length is known.
    pub response_body_data_left: i64,
    /// Remaining bytes of the current response body chunk.
    pub response_chunked_length: Option<u64>,
    /// Current response parser state.
    pub response_state: State,
    /// Previous response parser state.
    pub response_state_previous: State,
    /// The hook that should be receiving raw outbound connection data.
    pub response_data_receiver_hook: Option<DataHook>,
}

impl ConnectionParser {
    /// Creates a parser over a fresh connection.
    pub fn new(cfg: Config) -> Self {
        let conn = Connection::default();
        let logger = Logger::new(conn.get_sender(), cfg.log_level);
        Self {
            cfg,
            logger,
            conn,
            request_status: HtpStreamState::NEW,
            request_timestamp: None,
            request_curr_data: Cursor::new(Vec::new()),
            request_current_receiver_offset: 0,
            request_chunk_count: 0,
            request_chunk_request_index: 0,
            request_buf: Bstr::new(),
            request_header: None,
            request_header_folded: false,
            request_tx: None,
            request_content_length: -1,
            request_body_data_left: -1,
            request_chunked_length: None,
            request_state: State::IDLE,
            request_state_previous: State::NONE,
            request_data_receiver_hook: None,
            put_file: None,
            response_next_tx_index: 0,
            response_status: HtpStreamState::NEW,
            response_data_other_at_tx_end: false,
            response_timestamp: None,
            response_curr_data: Cursor::new(Vec::new()),
            response_current_receiver_offset: 0,
            response_buf: Bstr::new(),
            response_header: None,
            response_header_folded: false,
            response_tx: None,
            response_content_length: -1,
            response_body_data_left: -1,
            response_chunked_length: None,
            response_state: State::IDLE,
            response_state_previous: State::NONE,
            response_data_receiver_hook: None,
        }
    }

    /// Opens the connection: stores the endpoints and marks both streams
    /// usable.
    pub fn open(
        &mut self,
        client_addr: Option<IpAddr>,
        client_port: Option<u16>,
        server_addr: Option<IpAddr>,
        server_port: Option<u16>,
        timestamp: Option<OffsetDateTime>,
    ) {
        if self.request_status != HtpStreamState::NEW
            || self.response_status != HtpStreamState::NEW
        {
            htp_error!(
                self.logger,
                HtpLogCode::CONNECTION_ALREADY_OPEN,
                "Connection is already open"
            );
            return;
        }
        self.conn
            .open(client_addr, client_port, server_addr, server_port, timestamp);
        self.request_status = HtpStreamState::OPEN;
        self.response_status = HtpStreamState::OPEN;
    }

    /// Closes the inbound stream. The parsers get one final, zero-length
    /// invocation to process events that depend on stream closure.
    pub fn request_close(&mut self, timestamp: Option<OffsetDateTime>) {
        if self.request_status != HtpStreamState::ERROR {
            self.request_status = HtpStreamState::CLOSED;
        }
        self.request_data(b"", timestamp);
    }

    /// Closes both streams of the connection.
    pub fn close(&mut self, timestamp: Option<OffsetDateTime>) {
        self.conn.close(timestamp);
        if self.request_status != HtpStreamState::ERROR {
            self.request_status = HtpStreamState::CLOSED;
        }
        if self.response_status != HtpStreamState::ERROR {
            self.response_status = HtpStreamState::CLOSED;
        }
        self.request_data(b"", timestamp);
        self.response_data(b"", timestamp);
    }

    /// Creates a transaction, attaches it to the connection, and makes it
    /// the inbound transaction.
    pub fn create_tx(&mut self) -> Result<usize> {
        // Detect pipelining.
        if self.conn.tx_size() > self.response_next_tx_index {
            self.conn.flags.set(ConnectionFlags::PIPELINED)
        }
        let index = self.conn.tx_size();
        let tx = Transaction::new(self.logger.clone(), index);
        self.conn.push_tx(tx);
        self.request_tx = Some(index);
        self.request_reset();
        Ok(index)
    }

    /// Resets per-request parser fields for a new inbound transaction.
    pub fn request_reset(&mut self) {
        self.request_content_length = -1;
        self.request_body_data_left = -1;
        self.request_chunked_length = None;
        self.request_chunk_request_index = self.request_chunk_count;
        self.request_header_folded = false;
    }

    /// The inbound transaction, if one is active.
    pub fn request(&self) -> Option<&Transaction> {
        self.request_tx.and_then(|index| self.conn.tx(index))
    }

    /// The inbound transaction, mutable.
    pub fn request_mut(&mut self) -> Option<&mut Transaction> {
        let index = self.request_tx;
        index.and_then(move |index| self.conn.tx_mut(index))
    }

    /// The inbound transaction, or ERROR if there is none.
    pub fn request_mut_ok(&mut self) -> Result<&mut Transaction> {
        self.request_mut().ok_or(HtpStatus::ERROR)
    }

    /// The index of the inbound transaction.
    pub fn request_tx_index(&self) -> Option<usize> {
        self.request_tx
    }

    /// The outbound transaction, if one is active.
    pub fn response(&self) -> Option<&Transaction> {
        self.response_tx.and_then(|index| self.conn.tx(index))
    }

    /// The outbound transaction, mutable.
    pub fn response_mut(&mut self) -> Option<&mut Transaction> {
        let index = self.response_tx;
        index.and_then(move |index| self.conn.tx_mut(index))
    }

    /// The outbound transaction, or ERROR if there is none.
    pub fn response_mut_ok(&mut self) -> Result<&mut Transaction> {
        self.response_mut().ok_or(HtpStatus::ERROR)
    }

    /// The index of the outbound transaction.
    pub fn response_tx_index(&self) -> Option<usize> {
        self.response_tx
    }

    /// Retrieves a transaction by index; test and inspection helper.
    pub fn tx(&self, index: usize) -> Option<&Transaction> {
        self.conn.tx(index)
    }

    /// Retrieves a mutable transaction by index.
    pub fn tx_mut(&mut self, index: usize) -> Option<&mut Transaction> {
        self.conn.tx_mut(index)
    }

    /// The number of transactions seen on this connection.
    pub fn tx_size(&self) -> usize {
        self.conn.tx_size()
    }

    /// Runs the state function for the current request state.
    pub fn handle_request_state(&mut self, chunk: &[u8]) -> Result<()> {
        let data = &chunk[self.request_curr_data.position() as usize..];
        match self.request_state {
            State::NONE => Err(HtpStatus::ERROR),
            State::IDLE => self.request_idle(),
            State::IGNORE_DATA_AFTER_HTTP_0_9 => self.request_ignore_data_after_http_0_9(),
            State::LINE => self.request_line(data),
            State::PROTOCOL => self.request_protocol(data),
            State::HEADERS => self.request_headers(data),
            State::CONNECT_CHECK => self.request_connect_check(),
            State::CONNECT_WAIT_RESPONSE => self.request_connect_wait_response(),
            State::BODY_DETERMINE => self.request_body_determine(),
            State::BODY_CHUNKED_LENGTH => self.request_body_chunked_length(data),
            State::BODY_CHUNKED_DATA => self.request_body_chunked_data(data),
            State::BODY_CHUNKED_DATA_END => self.request_body_chunked_data_end(data),
            State::BODY_IDENTITY => self.request_body_identity(data),
            State::FINALIZE => self.request_finalize(data),
            // Response-only states.
            _ => Err(HtpStatus::ERROR),
        }
    }

    /// Runs the state function for the current response state.
    pub fn handle_response_state(&mut self, chunk: &[u8]) -> Result<()> {
        let data = &chunk[self.response_curr_data.position() as usize..];
        match self.response_state {
            State::NONE => Err(HtpStatus::ERROR),
            State::IDLE => self.response_idle(),
            State::LINE => self.response_line(data),
            State::HEADERS => self.response_headers(data),
            State::BODY_DETERMINE => self.response_body_determine(),
            State::BODY_CHUNKED_LENGTH => self.response_body_chunked_length(data),
            State::BODY_CHUNKED_DATA => self.response_body_chunked_data(data),
            State::BODY_CHUNKED_DATA_END => self.response_body_chunked_data_end(data),
            State::BODY_IDENTITY_CL_KNOWN => self.response_body_identity_cl_known(data),
            State::BODY_IDENTITY_STREAM_CLOSE => self.response_body_identity_stream_close(data),
            State::FINALIZE => self.response_finalize(data),
            // Request-only states.
            _ => Err(HtpStatus::ERROR),
        }
    }

    /// Returns the number of bytes consumed from the current inbound data
    /// chunk. When request_data returns DATA_OTHER, the caller must
    /// preserve the unconsumed tail and resupply it later.
    pub fn request_data_consumed(&self) -> i64 {
        self.request_curr_data.position() as i64
    }

    /// Returns the number of bytes consumed from the current outbound
    /// data chunk.
    pub fn response_data_consumed(&self) -> i64 {
        self.response_curr_data.position() as i64
    }

    // Transaction lifecycle states. Each moves a transaction's progress
    // forward and runs the callbacks registered for that point.

    /// A new request has begun: run TRANSACTION_START and REQUEST_START.
    pub fn state_request_start(&mut self) -> Result<()> {
        let hook_transaction_start = self.cfg.hook_transaction_start.clone();
        let hook_request_start = self.cfg.hook_request_start.clone();
        let tx = self.request_mut_ok()?;
        hook_transaction_start.run_all(tx)?;
        hook_request_start.run_all(tx)?;
        tx.request_progress = HtpRequestProgress::LINE;
        self.request_state = State::LINE;
        Ok(())
    }

    /// The request line is available: run REQUEST_LINE.
    pub fn state_request_line(&mut self) -> Result<()> {
        let hook_request_line = self.cfg.hook_request_line.clone();
        let tx = self.request_mut_ok()?;
        hook_request_line.run_all(tx)?;
        Ok(())
    }

    /// A request header block (headers or trailers) is complete.
    pub fn state_request_headers(&mut self) -> Result<()> {
        // Finalize any raw header data owed to the data receiver before
        // the block-level hook runs.
        self.request_receiver_finalize_clear()?;
        let progress = self.request_mut_ok()?.request_progress;
        if progress > HtpRequestProgress::HEADERS {
            // Trailers.
            let hook_request_trailer = self.cfg.hook_request_trailer.clone();
            let tx = self.request_mut_ok()?;
            hook_request_trailer.run_all(tx)?;
            self.request_state = State::FINALIZE;
        } else {
            // Request headers arriving across several packets is a known
            // evasion vector; note it on the transaction.
            if self.request_chunk_count != self.request_chunk_request_index {
                let tx = self.request_mut_ok()?;
                tx.flags.set(crate::util::HtpFlags::MULTI_PACKET_HEAD);
            }
            self.process_request_headers()?;
            let hook_request_headers = self.cfg.hook_request_headers.clone();
            let tx = self.request_mut_ok()?;
            hook_request_headers.run_all(tx)?;
            self.request_state = State::CONNECT_CHECK;
        }
        Ok(())
    }

    /// The request is complete: run REQUEST_COMPLETE, close out the
    /// upload file if any, and return the parser to IDLE.
    pub fn state_request_complete(&mut self) -> Result<()> {
        if self.request_mut_ok()?.request_progress == HtpRequestProgress::COMPLETE {
            return Ok(());
        }
        // Signal the end of the body to the body parsers and the upload
        // sink before the completion hooks run.
        if self.request_mut_ok()?.request_progress >= HtpRequestProgress::BODY
            || self.put_file.is_some()
        {
            self.request_process_body_data(None)?;
        }
        if let Some(mut file) = self.put_file.take() {
            file.handle_file_data(&self.cfg.hook_request_file_data, None)?;
        }
        self.request_mut_ok()?.request_progress = HtpRequestProgress::COMPLETE;
        self.request_receiver_finalize_clear()?;
        let hook_request_complete = self.cfg.hook_request_complete.clone();
        let tx = self.request_mut_ok()?;
        hook_request_complete.run_all(tx)?;
        let complete = tx.is_complete();
        let protocol_0_9 = tx.is_protocol_0_9;
        if complete {
            let hook_transaction_complete = self.cfg.hook_transaction_complete.clone();
            let tx = self.request_mut_ok()?;
            hook_transaction_complete.run_all(tx)?;
        }
        self.request_buf.clear();
        self.request_header = None;
        // A short-form exchange ends the usable request stream; anything
        // that follows it is noted and discarded.
        self.request_state = if protocol_0_9 {
            State::IGNORE_DATA_AFTER_HTTP_0_9
        } else {
            State::IDLE
        };
        Ok(())
    }

    /// A new response has begun: pick (or fabricate) the transaction and
    /// run RESPONSE_START.
    pub fn state_response_start(&mut self) -> Result<()> {
        if self.response_next_tx_index < self.conn.tx_size() {
            self.response_tx = Some(self.response_next_tx_index);
        } else {
            // A response with no request to match. Make a placeholder
            // request so inspection of the response can continue.
            htp_error!(
                self.logger,
                HtpLogCode::UNABLE_TO_MATCH_RESPONSE_TO_REQUEST,
                "Unable to match response to request"
            );
            let index = self.conn.tx_size();
            let mut tx = Transaction::new(self.logger.clone(), index);
            tx.request_uri = Some(Bstr::from("/request_uri_not_seen"));
            tx.request_progress = HtpRequestProgress::COMPLETE;
            self.conn.push_tx(tx);
            self.response_tx = Some(index);
        }
        self.response_content_length = -1;
        self.response_body_data_left = -1;
        let hook_response_start = self.cfg.hook_response_start.clone();
        let tx = self.response_mut_ok()?;
        hook_response_start.run_all(tx)?;
        tx.response_progress = HtpResponseProgress::LINE;
        self.response_state = State::LINE;
        Ok(())
    }

    /// The response line is available: run RESPONSE_LINE. An interim
    /// "100 Continue" line is not reported; only the final status line
    /// of the transaction is.
    pub fn state_response_line(&mut self) -> Result<()> {
        if self
            .response_mut_ok()?
            .response_status_number
            .eq_num(100)
        {
            return Ok(());
        }
        let hook_response_line = self.cfg.hook_response_line.clone();
        let tx = self.response_mut_ok()?;
        hook_response_line.run_all(tx)?;
        Ok(())
    }

    /// A response header block (headers or trailers) is complete.
    pub fn state_response_headers(&mut self) -> Result<()> {
        self.response_receiver_finalize_clear()?;
        let progress = self.response_mut_ok()?.response_progress;
        if progress > HtpResponseProgress::HEADERS {
            // Trailers.
            let hook_response_trailer = self.cfg.hook_response_trailer.clone();
            let tx = self.response_mut_ok()?;
            hook_response_trailer.run_all(tx)?;
        } else {
            self.setup_response_content_encoding()?;
            let hook_response_headers = self.cfg.hook_response_headers.clone();
            let tx = self.response_mut_ok()?;
            hook_response_headers.run_all(tx)?;
        }
        Ok(())
    }

    /// The response is complete: flush decompression, run
    /// RESPONSE_COMPLETE, advance the response transaction pointer.
    /// Invoking this twice for the same transaction is a no-op.
    pub fn state_response_complete(&mut self) -> Result<()> {
        if self.response_mut_ok()?.response_progress == HtpResponseProgress::COMPLETE {
            return Ok(());
        }
        // Let the decompressor emit anything it still buffers.
        if self.response_mut_ok()?.response_decompressor.is_some() {
            self.response_process_body_data(None)?;
        }
        self.response_mut_ok()?.response_progress = HtpResponseProgress::COMPLETE;
        self.response_receiver_finalize_clear()?;
        let hook_response_complete = self.cfg.hook_response_complete.clone();
        let tx = self.response_mut_ok()?;
        tx.response_decompressor = None;
        hook_response_complete.run_all(tx)?;
        let complete = tx.is_complete();
        if complete {
            let hook_transaction_complete = self.cfg.hook_transaction_complete.clone();
            let tx = self.response_mut_ok()?;
            hook_transaction_complete.run_all(tx)?;
        }
        self.response_buf.clear();
        self.response_header = None;
        self.response_next_tx_index += 1;
        self.response_state = State::IDLE;
        if self.response_data_other_at_tx_end {
            // The request parser is waiting to be resumed before the
            // next outbound transaction starts.
            self.response_data_other_at_tx_end = false;
            return Err(HtpStatus::DATA_OTHER);
        }
        Ok(())
    }
}
