//! htx is a permissive parser for HTTP/1.x traffic as seen on the wire.
//!
//! It consumes the two byte streams of a TCP connection (client-to-server
//! and server-to-client), in whatever chunks the capture layer produces,
//! and reconstructs the transactions exchanged on it: request line,
//! request headers, request body, response line, response headers,
//! response body. Registered callbacks are invoked as each element
//! becomes available.
//!
//! htx is built for passive inspection (IDS/WAF). It does not validate
//! traffic and it does not produce responses; malformed input is parsed
//! as far as possible and anomalies are accumulated as flags on the
//! transaction and as log records on the connection, so that a detection
//! layer can see what the endpoints see.

// Enum variants follow the on-the-wire vocabulary (methods, stream
// states, flag words), which is screaming-case throughout.
#![allow(non_camel_case_types)]

#[macro_use]
/// Provides logging facilities.
pub mod log;
/// Byte string container.
pub mod bstr;
/// Configuration for the parser.
pub mod config;
/// Connection-level state.
pub mod connection;
/// The connection parser: stream drivers and transaction lifecycle.
pub mod connection_parser;
/// Hooks that route body data into body-format parsers.
pub mod content_handlers;
/// Streaming response body decompression.
pub mod decompressors;
/// Errors and result types.
pub mod error;
/// Callback registries.
pub mod hook;
/// The multipart/form-data parser.
pub mod multipart;
/// Header-value and line parsers.
pub mod parsers;
/// Request-side states.
pub mod request;
/// Response-side states.
pub mod response;
/// Ordered case-insensitive table.
pub mod table;
/// Transactions: one request/response pair.
pub mod transaction;
/// URI splitting.
pub mod uri;
/// Shared helpers: flags, byte classes, nom combinators, the file sink.
pub mod util;

/// Status codes used by htx internally.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HtpStatus {
    /// The lowest value htx will use internally.
    ERROR_RESERVED = -1000,
    /// General-purpose error code.
    ERROR = -1,
    /// No processing or work was done. This is typically used by callbacks
    /// to indicate that they were not interested in doing any work in the
    /// given context.
    DECLINED = 0,
    /// Returned by a function when its work was successfully completed.
    OK = 1,
    /// Returned when processing a connection stream, after consuming all
    /// provided data. The caller should call again with more data.
    DATA = 2,
    /// Returned when processing a connection stream, after encountering
    /// a situation where processing needs to continue on the alternate
    /// stream (e.g., the inbound parser needs to observe some outbound
    /// data). The data provided was not completely consumed. On the next
    /// invocation the caller should supply only the data that has not
    /// been processed already. Use request_data_consumed() and
    /// response_data_consumed() to determine how much of the most
    /// recent data chunk was consumed.
    DATA_OTHER = 3,
    /// Used by callbacks to indicate that the processing should stop.
    /// Returning STOP from a connection callback tells htx to stop
    /// following that particular direction.
    STOP = 4,
    /// Same as DATA, but indicates that any non-consumed part of the data
    /// chunk should be preserved (buffered) for later.
    DATA_BUFFER = 5,
    /// The highest value htx will use internally.
    STATUS_RESERVED = 1000,
}
