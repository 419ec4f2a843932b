use crate::{
    bstr::Bstr,
    decompressors::{Decompressor, HtpContentEncoding},
    hook::DataHook,
    log::Logger,
    multipart::MultipartParser,
    request::HtpMethod,
    table::Table,
    uri::Uri,
};
use std::any::Any;

/// A collection of headers, keyed by header name.
pub type Headers = Table<Header>;

/// Protocol version, stored as major * 100 + minor so versions compare
/// in the expected order.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
#[allow(non_camel_case_types)]
pub enum HtpProtocol {
    /// The protocol token was present but could not be parsed.
    INVALID = -2,
    /// Default value, protocol not determined yet.
    UNKNOWN = -1,
    /// HTTP/0.9.
    V0_9 = 9,
    /// HTTP/1.0.
    V1_0 = 100,
    /// HTTP/1.1.
    V1_1 = 101,
}

/// Body framing in use for one message.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HtpTransferCoding {
    /// Body framing not determined yet.
    UNKNOWN,
    /// No body.
    NO_BODY,
    /// Framed by Content-Length or end of stream.
    IDENTITY,
    /// Chunked transfer coding.
    CHUNKED,
    /// The Transfer-Encoding header exists but its value is not usable.
    INVALID,
}

/// Progress of request parsing, in order.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub enum HtpRequestProgress {
    /// The request line has not been seen.
    NOT_STARTED,
    /// Parsing the request line.
    LINE,
    /// Parsing request headers.
    HEADERS,
    /// Consuming the request body.
    BODY,
    /// Parsing trailer headers.
    TRAILER,
    /// The entire request has been seen.
    COMPLETE,
}

/// Progress of response parsing, in order.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub enum HtpResponseProgress {
    /// The response line has not been seen.
    NOT_STARTED,
    /// Parsing the response line.
    LINE,
    /// Parsing response headers.
    HEADERS,
    /// Consuming the response body.
    BODY,
    /// Parsing trailer headers.
    TRAILER,
    /// The entire response has been seen.
    COMPLETE,
}

/// The authentication scheme seen in the Authorization header.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HtpAuthType {
    /// No authentication information seen (yet).
    UNKNOWN,
    /// Basic authentication.
    BASIC,
    /// Digest authentication.
    DIGEST,
    /// Some other, unrecognized scheme.
    UNRECOGNIZED,
    /// No Authorization header present.
    NONE,
}

/// The numeric response status. Kept as a sum so that the difference
/// between "absent" and "present but unparsable" survives.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HtpResponseNumber {
    /// The status has not been seen.
    UNKNOWN,
    /// The status token could not be parsed as a number in 100..=999.
    INVALID,
    /// A parsed status code.
    VALID(u16),
}

impl Default for HtpResponseNumber {
    fn default() -> Self {
        HtpResponseNumber::UNKNOWN
    }
}

impl HtpResponseNumber {
    /// Is the status code within the given (inclusive) range?
    pub fn in_range(self, min: u16, max: u16) -> bool {
        match self {
            HtpResponseNumber::VALID(status) => status >= min && status <= max,
            _ => false,
        }
    }

    /// Is the status code equal to the given number?
    pub fn eq_num(self, num: u16) -> bool {
        self == HtpResponseNumber::VALID(num)
    }
}

/// One HTTP header, as stored on a transaction or a multipart part.
#[derive(Clone, Debug)]
pub struct Header {
    /// Header name.
    pub name: Bstr,
    /// Header value. Values of repeated same-name headers are joined
    /// with ", ".
    pub value: Bstr,
    /// Anomalies observed on this header (HtpFlags namespace).
    pub flags: u64,
}

impl Header {
    /// Creates a header with no flags raised.
    pub fn new(name: Bstr, value: Bstr) -> Self {
        Self::new_with_flags(name, value, 0)
    }

    /// Creates a header with the given flags.
    pub fn new_with_flags(name: Bstr, value: Bstr, flags: u64) -> Self {
        Self { name, value, flags }
    }
}

/// A chunk of transaction data passed to data hooks. The slice borrows
/// the caller's chunk or the parser's line buffer; it is valid only for
/// the duration of the callback.
pub struct Data<'a> {
    tx: &'a mut Transaction,
    data: Option<&'a [u8]>,
    is_last: bool,
}

impl<'a> Data<'a> {
    /// Packages a data chunk for callbacks.
    pub fn new(tx: &'a mut Transaction, data: Option<&'a [u8]>, is_last: bool) -> Self {
        Self { tx, data, is_last }
    }

    /// The transaction this data belongs to.
    pub fn tx(&self) -> &Transaction {
        self.tx
    }

    /// The transaction this data belongs to, mutable.
    pub fn tx_mut(&mut self) -> &mut Transaction {
        self.tx
    }

    /// The data itself; None marks the end of the stream. The returned
    /// slice is independent of this Data wrapper, so the transaction
    /// remains borrowable while the slice is held.
    pub fn data(&self) -> Option<&'a [u8]> {
        self.data
    }

    /// The data as a slice; empty at end of stream.
    pub fn as_slice(&self) -> &'a [u8] {
        self.data.unwrap_or(b"")
    }

    /// Chunk length.
    pub fn len(&self) -> usize {
        self.data.map(|data| data.len()).unwrap_or(0)
    }

    /// Is there no actual data in this chunk?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is this the final chunk of its kind for this transaction?
    pub fn is_last(&self) -> bool {
        self.is_last
    }
}

/// Represents a single HTTP transaction, which is a combination of a
/// request and a response.
pub struct Transaction {
    /// The position of this transaction in the connection's list.
    pub index: usize,
    /// Log channel writer, cloned from the connection.
    pub logger: Logger,
    /// Transaction-wide anomaly flags (HtpFlags namespace).
    pub flags: u64,

    /// How far has request parsing progressed?
    pub request_progress: HtpRequestProgress,
    /// Whether this request lacks a protocol token (short form).
    pub is_protocol_0_9: bool,
    /// Request method, as seen on the wire.
    pub request_method: Option<Bstr>,
    /// Request method, converted.
    pub request_method_number: HtpMethod,
    /// The complete request line.
    pub request_line: Option<Bstr>,
    /// Request URI, as seen on the wire.
    pub request_uri: Option<Bstr>,
    /// Request protocol token, as seen on the wire.
    pub request_protocol: Option<Bstr>,
    /// Request protocol, converted.
    pub request_protocol_number: HtpProtocol,
    /// The request URI, split into components.
    pub parsed_uri: Option<Uri>,
    /// Request headers.
    pub request_headers: Headers,
    /// Request body framing.
    pub request_transfer_coding: HtpTransferCoding,
    /// Request body length from a valid Content-Length header;
    /// -1 when unknown.
    pub request_content_length: i64,
    /// Request MIME type, lowercased, parameters stripped.
    pub request_content_type: Option<Bstr>,
    /// The length of the request message, in raw bytes on the wire.
    pub request_message_len: i64,
    /// The length of the request entity, after dechunking.
    pub request_entity_len: i64,
    /// Ignorable empty lines seen before this request.
    pub request_ignored_lines: u32,
    /// Counter of repeated request headers.
    pub request_header_repetitions: u16,
    /// Request cookies, in order of appearance.
    pub request_cookies: Table<Bstr>,
    /// Authentication scheme.
    pub request_auth_type: HtpAuthType,
    /// Authentication username, when it could be extracted.
    pub request_auth_username: Option<Bstr>,
    /// Authentication password (Basic only).
    pub request_auth_password: Option<Bstr>,
    /// The effective hostname: from the URI when it carries one,
    /// otherwise from the Host header. Lowercased.
    pub request_hostname: Option<Bstr>,
    /// The effective port number, when one was specified.
    pub request_port_number: Option<u16>,
    /// The multipart parser attached to this request, if the body is
    /// multipart/form-data.
    pub request_mpartp: Option<MultipartParser>,
    /// Request parameters extracted from body parsers.
    pub request_params: Table<Bstr>,
    /// Transaction-level request body data hook.
    pub hook_request_body_data: DataHook,

    /// How far has response parsing progressed?
    pub response_progress: HtpResponseProgress,
    /// The complete response line.
    pub response_line: Option<Bstr>,
    /// Response protocol token, as seen on the wire.
    pub response_protocol: Option<Bstr>,
    /// Response protocol, converted.
    pub response_protocol_number: HtpProtocol,
    /// Response status token, as seen on the wire.
    pub response_status: Option<Bstr>,
    /// Response status, converted.
    pub response_status_number: HtpResponseNumber,
    /// Response status message.
    pub response_message: Option<Bstr>,
    /// Response headers.
    pub response_headers: Headers,
    /// Response body framing.
    pub response_transfer_coding: HtpTransferCoding,
    /// Response body length from a valid Content-Length header;
    /// -1 when unknown.
    pub response_content_length: i64,
    /// Response MIME type, lowercased, parameters stripped.
    pub response_content_type: Option<Bstr>,
    /// Content encoding declared by the response headers.
    pub response_content_encoding: HtpContentEncoding,
    /// Content encoding actually applied to body data. This may differ
    /// from the declared one when decompression is disabled or fails.
    pub response_content_encoding_processing: HtpContentEncoding,
    /// The decompressor for the response body, when one is active.
    pub response_decompressor: Option<Decompressor>,
    /// The length of the response message, in raw bytes on the wire.
    pub response_message_len: i64,
    /// The length of the response entity, after dechunking and
    /// decompression.
    pub response_entity_len: i64,
    /// Ignorable empty lines seen before this response.
    pub response_ignored_lines: u32,
    /// Counter of repeated response headers.
    pub response_header_repetitions: u16,
    /// Has an interim 100 Continue response been seen?
    pub seen_100continue: bool,
    /// Transaction-level response body data hook.
    pub hook_response_body_data: DataHook,

    /// Opaque data attached by the embedding application.
    pub user_data: Option<Box<dyn Any>>,
}

impl Transaction {
    /// Creates a new transaction at the given connection index.
    pub fn new(logger: Logger, index: usize) -> Self {
        Self {
            index,
            logger,
            flags: 0,
            request_progress: HtpRequestProgress::NOT_STARTED,
            is_protocol_0_9: false,
            request_method: None,
            request_method_number: HtpMethod::UNKNOWN,
            request_line: None,
            request_uri: None,
            request_protocol: None,
            request_protocol_number: HtpProtocol::UNKNOWN,
            parsed_uri: None,
            request_headers: Table::with_capacity(32),
            request_transfer_coding: HtpTransferCoding::UNKNOWN,
            request_content_length: -1,
            request_content_type: None,
            request_message_len: 0,
            request_entity_len: 0,
            request_ignored_lines: 0,
            request_header_repetitions: 0,
            request_cookies: Table::with_capacity(0),
            request_auth_type: HtpAuthType::UNKNOWN,
            request_auth_username: None,
            request_auth_password: None,
            request_hostname: None,
            request_port_number: None,
            request_mpartp: None,
            request_params: Table::with_capacity(0),
            hook_request_body_data: DataHook::new(),
            response_progress: HtpResponseProgress::NOT_STARTED,
            response_line: None,
            response_protocol: None,
            response_protocol_number: HtpProtocol::UNKNOWN,
            response_status: None,
            response_status_number: HtpResponseNumber::UNKNOWN,
            response_message: None,
            response_headers: Table::with_capacity(32),
            response_transfer_coding: HtpTransferCoding::UNKNOWN,
            response_content_length: -1,
            response_content_type: None,
            response_content_encoding: HtpContentEncoding::NONE,
            response_content_encoding_processing: HtpContentEncoding::NONE,
            response_decompressor: None,
            response_message_len: 0,
            response_entity_len: 0,
            response_ignored_lines: 0,
            response_header_repetitions: 0,
            seen_100continue: false,
            hook_response_body_data: DataHook::new(),
            user_data: None,
        }
    }

    /// Has this transaction been fully parsed?
    pub fn is_complete(&self) -> bool {
        // A transaction is considered complete only when both the request
        // and the response are complete.
        self.request_progress == HtpRequestProgress::COMPLETE
            && self.response_progress == HtpResponseProgress::COMPLETE
    }

    /// Attaches opaque user data to this transaction.
    pub fn set_user_data(&mut self, data: Box<dyn Any>) {
        self.user_data = Some(data);
    }

    /// Borrows the attached user data, if its type matches.
    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_ref().and_then(|ud| ud.downcast_ref())
    }

    /// Mutably borrows the attached user data, if its type matches.
    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut().and_then(|ud| ud.downcast_mut())
    }

    /// Registers a transaction-level request body data callback.
    pub fn register_request_body_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_request_body_data.register(cbk_fn)
    }

    /// Registers a transaction-level response body data callback.
    pub fn register_response_body_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_response_body_data.register(cbk_fn)
    }
}
