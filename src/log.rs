use crate::connection::Connection;
use std::sync::mpsc::Sender;

/// Log message severity.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub enum HtpLogLevel {
    /// No log level.
    NONE,
    /// Designates fatal error.
    ERROR,
    /// Designates hazardous situations.
    WARNING,
    /// Default log level value.
    NOTICE,
    /// Designates useful information.
    INFO,
    /// Designates lower priority information.
    DEBUG,
    /// Designates very low priority, often extremely verbose, information.
    DEBUG2,
}

/// Enumerates all log codes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum HtpLogCode {
    UNKNOWN,
    CONNECTION_ALREADY_OPEN,
    ZERO_LENGTH_DATA_CHUNKS,
    PARSER_STATE_ERROR,
    MISSING_INBOUND_TRANSACTION_DATA,
    MISSING_OUTBOUND_TRANSACTION_DATA,
    UNABLE_TO_MATCH_RESPONSE_TO_REQUEST,
    REQUEST_FIELD_TOO_LONG,
    RESPONSE_FIELD_TOO_LONG,
    INVALID_REQUEST_CHUNK_LEN,
    INVALID_RESPONSE_CHUNK_LEN,
    REQUEST_CHUNK_EXTENSION,
    RESPONSE_CHUNK_EXTENSION,
    METHOD_DELIM_NON_COMPLIANT,
    URI_DELIM_NON_COMPLIANT,
    REQUEST_LINE_LEADING_WHITESPACE,
    REQUEST_LINE_NO_PROTOCOL,
    REQUEST_LINE_UNKNOWN_METHOD,
    REQUEST_LINE_UNKNOWN_METHOD_NO_PROTOCOL,
    REQUEST_LINE_UNKNOWN_METHOD_INVALID_PROTOCOL,
    RESPONSE_LINE_INVALID_PROTOCOL,
    RESPONSE_LINE_INVALID_RESPONSE_STATUS,
    PROTOCOL_CONTAINS_EXTRA_DATA,
    CONTENT_LENGTH_EXTRA_DATA_START,
    CONTENT_LENGTH_EXTRA_DATA_END,
    DUPLICATE_CONTENT_LENGTH_FIELD_IN_REQUEST,
    DUPLICATE_CONTENT_LENGTH_FIELD_IN_RESPONSE,
    INVALID_CONTENT_LENGTH_FIELD_IN_REQUEST,
    INVALID_CONTENT_LENGTH_FIELD_IN_RESPONSE,
    CONTINUE_ALREADY_SEEN,
    REQUEST_HEADER_INVALID,
    RESPONSE_HEADER_INVALID,
    REQUEST_HEADER_REPETITION,
    RESPONSE_HEADER_REPETITION,
    REQUEST_FIELD_MISSING_COLON,
    RESPONSE_FIELD_MISSING_COLON,
    REQUEST_INVALID_EMPTY_NAME,
    RESPONSE_INVALID_EMPTY_NAME,
    REQUEST_INVALID_LWS_AFTER_NAME,
    RESPONSE_INVALID_LWS_AFTER_NAME,
    INVALID_REQUEST_FIELD_FOLDING,
    INVALID_RESPONSE_FIELD_FOLDING,
    REQUEST_SMUGGLING,
    INVALID_REQUEST_TRANSFER_ENCODING,
    RESPONSE_ABNORMAL_TRANSFER_ENCODING,
    RESPONSE_CHUNKED_OLD_PROTO,
    REQUEST_BODY_UNEXPECTED,
    RESPONSE_BODY_UNEXPECTED,
    HOST_MISSING,
    HOST_AMBIGUOUS,
    HOSTNAME_INVALID,
    AUTH_INVALID,
    COOKIE_INVALID,
    RESPONSE_MULTIPART_BYTERANGES,
    COMPRESSION_BOMB,
    RESPONSE_DECOMPRESSION_FAILED,
    MULTIPART_BOUNDARY_INVALID,
    MULTIPART_PARSING_INCOMPLETE,
    FILE_LIMIT_REACHED,
}

/// Contents of a log record: where it was raised and what it says.
#[derive(Clone, Debug)]
pub struct Message {
    /// The source file where the message was raised.
    pub file: String,
    /// The line where the message was raised.
    pub line: u32,
    /// The message severity.
    pub level: HtpLogLevel,
    /// The message code.
    pub code: HtpLogCode,
    /// The message text.
    pub msg: String,
}

/// A log record drained from a connection, pairing a message with the
/// connection it was observed on.
#[derive(Clone, Debug)]
pub struct Log {
    /// Message contents.
    pub msg: Message,
}

impl Log {
    /// Wraps a message drained from the given connection.
    pub fn new(_conn: &Connection, msg: Message) -> Self {
        Self { msg }
    }
}

/// The write half of a connection's log channel, paired with the level
/// below which records are dropped.
#[derive(Clone)]
pub struct Logger {
    /// The sender half of the connection's log channel.
    pub sender: Sender<Message>,
    /// Records below this level are discarded.
    pub level: HtpLogLevel,
}

impl Logger {
    /// Creates a new logger over the given channel sender.
    pub fn new(sender: &Sender<Message>, level: HtpLogLevel) -> Self {
        Self {
            sender: sender.clone(),
            level,
        }
    }

    /// Pushes a record onto the channel, subject to the level filter.
    pub fn log(&self, file: &str, line: u32, level: HtpLogLevel, code: HtpLogCode, msg: String) {
        if level <= self.level {
            // The receiver only disappears when the connection is dropped.
            let _ = self.sender.send(Message {
                file: file.to_string(),
                line,
                level,
                code,
                msg,
            });
        }
    }
}

/// Logs a message at the given level.
#[macro_export]
macro_rules! htp_log {
    ($logger:expr, $level:expr, $code:expr, $msg:expr) => {{
        use $crate::log::{HtpLogCode, HtpLogLevel};
        $logger.log(file!(), line!(), $level, $code, $msg.to_string());
    }};
}

/// Logs an error message.
#[macro_export]
macro_rules! htp_error {
    ($logger:expr, $code:expr, $msg:expr) => {
        htp_log!($logger, HtpLogLevel::ERROR, $code, $msg);
    };
}

/// Logs a warning message.
#[macro_export]
macro_rules! htp_warn {
    ($logger:expr, $code:expr, $msg:expr) => {
        htp_log!($logger, HtpLogLevel::WARNING, $code, $msg);
    };
}

/// Logs an info message.
#[macro_export]
macro_rules! htp_info {
    ($logger:expr, $code:expr, $msg:expr) => {
        htp_log!($logger, HtpLogLevel::INFO, $code, $msg);
    };
}

/// Logs a warning and sets a transaction flag, but only the first time
/// the flag is raised on the transaction.
#[macro_export]
macro_rules! htp_warn_once {
    ($logger:expr, $code:expr, $msg:expr, $tx_flags:expr, $flag:expr) => {{
        use $crate::util::FlagOperations;
        if !$tx_flags.is_set($flag) {
            htp_warn!($logger, $code, $msg);
        }
        $tx_flags.set($flag);
    }};
}
