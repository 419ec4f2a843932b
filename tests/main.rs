#![allow(non_snake_case)]
use htx::{
    config::Config,
    connection_parser::{ConnectionParser, HtpStreamState},
    error::Result,
    transaction::{
        HtpProtocol, HtpRequestProgress, HtpResponseProgress, HtpTransferCoding, Transaction,
    },
    util::{ConnectionFlags, FlagOperations, HtpFlags},
    HtpStatus,
};

mod common;
use common::{client, server, test_config, MainUserData, Test};

fn request_data_concat(tx: &Transaction) -> Vec<u8> {
    let user_data = tx.user_data::<MainUserData>().unwrap();
    user_data
        .request_data
        .iter()
        .fold(Vec::new(), |mut acc, chunk| {
            acc.extend_from_slice(chunk.as_slice());
            acc
        })
}

fn response_data_concat(tx: &Transaction) -> Vec<u8> {
    let user_data = tx.user_data::<MainUserData>().unwrap();
    user_data
        .response_data
        .iter()
        .fold(Vec::new(), |mut acc, chunk| {
            acc.extend_from_slice(chunk.as_slice());
            acc
        })
}

#[test]
fn Get() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET /one/two/three?p=%20 HTTP/1.1\r\nHost: www.example.com\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nhello\n"),
        ])
        .is_ok());

    assert_eq!(1, t.connp.tx_size());
    let tx = t.connp.tx(0).unwrap();

    assert!(tx.request_method.as_ref().unwrap().eq_slice("GET"));
    assert!(tx
        .request_uri
        .as_ref()
        .unwrap()
        .eq_slice("/one/two/three?p=%20"));
    assert_eq!(tx.request_protocol_number, HtpProtocol::V1_1);
    assert!(tx
        .request_hostname
        .as_ref()
        .unwrap()
        .eq_slice("www.example.com"));
    assert!(tx
        .parsed_uri
        .as_ref()
        .unwrap()
        .query
        .as_ref()
        .unwrap()
        .eq_slice("p=%20"));

    assert_eq!(tx.request_progress, HtpRequestProgress::COMPLETE);
    assert_eq!(tx.response_progress, HtpResponseProgress::COMPLETE);
    assert!(tx.is_complete());
    assert!(tx.response_status_number.eq_num(200));
    assert_eq!(response_data_concat(tx), b"hello\n");
}

// Minimal HTTP/0.9 exchange: a short-form request and a body that runs
// until the connection closes.
#[test]
fn ZeroNineMinimal() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![client(b"GET /x\n"), server(b"hello\n")])
        .is_ok());

    assert_eq!(1, t.connp.tx_size());
    let tx = t.connp.tx(0).unwrap();

    assert!(tx.request_method.as_ref().unwrap().eq_slice("GET"));
    assert!(tx.request_uri.as_ref().unwrap().eq_slice("/x"));
    assert!(tx.is_protocol_0_9);
    assert_eq!(tx.request_protocol_number, HtpProtocol::V0_9);
    assert_eq!(tx.request_progress, HtpRequestProgress::COMPLETE);
    assert_eq!(tx.response_progress, HtpResponseProgress::COMPLETE);
    assert_eq!(response_data_concat(tx), b"hello\n");

    let user_data = tx.user_data::<MainUserData>().unwrap();
    assert!(user_data.events.contains(&"request_complete"));
    assert!(user_data.events.contains(&"response_complete"));
}

// A chunked request body: the data arrives dechunked, the trailer block
// is empty, and the content length stays unknown.
#[test]
fn ChunkedRequest() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n\
                  5\r\nhello\r\n0\r\n\r\n"
            ),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.request_transfer_coding, HtpTransferCoding::CHUNKED);
    assert_eq!(tx.request_content_length, -1);
    assert_eq!(tx.request_progress, HtpRequestProgress::COMPLETE);
    assert_eq!(request_data_concat(tx), b"hello");
    assert_eq!(tx.request_entity_len, 5);

    let user_data = tx.user_data::<MainUserData>().unwrap();
    assert!(user_data.events.contains(&"request_trailer"));
}

// Transfer-Encoding together with Content-Length is the classic request
// smuggling setup; the body is parsed as chunked.
#[test]
fn ChunkedWithContentLengthSmuggling() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 10\r\n\
                  Transfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n"
            ),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::REQUEST_SMUGGLING));
    assert_eq!(tx.request_transfer_coding, HtpTransferCoding::CHUNKED);
    assert_eq!(request_data_concat(tx), b"hello");
}

// A repeated Content-Length header is a smuggling indicator too.
#[test]
fn RepeatedContentLengthSmuggling() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\
                  Content-Length: 2\r\n\r\nAB"
            ),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::REQUEST_SMUGGLING));
    let (_, cl) = tx.request_headers.get_nocase("content-length").unwrap();
    assert!(cl.flags.is_set(HtpFlags::FIELD_REPEATED));
}

// A successful CONNECT: after the 2xx both directions are tunnels and
// the tunneled bytes are not interpreted.
#[test]
fn ConnectSuccess() {
    let mut t = Test::new(test_config());
    assert!(t
        .run_ex(
            vec![
                client(b"CONNECT h:443 HTTP/1.1\r\nHost: h:443\r\n\r\n"),
                server(b"HTTP/1.1 200 OK\r\n\r\n"),
                client(b"\x16\x03\x01\x02\x00tunnel bytes"),
                server(b"\x16\x03\x03\x00\x3atunnel bytes"),
            ],
            false,
        )
        .is_ok());

    assert_eq!(1, t.connp.tx_size());
    assert_eq!(t.connp.request_status, HtpStreamState::TUNNEL);
    assert_eq!(t.connp.response_status, HtpStreamState::TUNNEL);

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.request_progress, HtpRequestProgress::COMPLETE);
    // Tunnel bytes are neither parsed nor delivered as body.
    assert_eq!(request_data_concat(tx), b"");
    assert_eq!(response_data_concat(tx), b"");
}

// A failed CONNECT: the inbound stream resumes and the next request
// starts a new transaction.
#[test]
fn ConnectFailure() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"CONNECT h:443 HTTP/1.1\r\nHost: h:443\r\n\r\n"),
            server(
                b"HTTP/1.1 407 Proxy Authentication Required\r\n\
                  Content-Length: 0\r\n\r\n"
            ),
            client(b"GET /next HTTP/1.1\r\nHost: h\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    assert_eq!(2, t.connp.tx_size());
    let tx = t.connp.tx(0).unwrap();
    assert!(tx.request_method.as_ref().unwrap().eq_slice("CONNECT"));
    assert!(tx.response_status_number.eq_num(407));
    assert!(tx.is_complete());

    let tx2 = t.connp.tx(1).unwrap();
    assert!(tx2.request_uri.as_ref().unwrap().eq_slice("/next"));
    assert!(tx2.is_complete());
}

// An interim 100 response: its line and headers are discarded, and the
// transaction records the final status.
#[test]
fn Expect100Continue() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"POST / HTTP/1.1\r\nHost: h\r\nExpect: 100-continue\r\n\
                  Content-Length: 2\r\n\r\nOK"
            ),
            server(
                b"HTTP/1.1 100 Continue\r\nHeader1: interim\r\n\r\n\
                  HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK"
            ),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.seen_100continue);
    assert!(tx.response_status_number.eq_num(200));
    // The interim headers must not be among the final headers.
    assert!(tx.response_headers.get_nocase_nozero("Header1").is_none());
    assert_eq!(response_data_concat(tx), b"OK");

    // A single response_line event, for the 200.
    let user_data = tx.user_data::<MainUserData>().unwrap();
    assert_eq!(
        1,
        user_data
            .events
            .iter()
            .filter(|e| **e == "response_line")
            .count()
    );
}

// A short-form request after a 1.1 transaction: parsed as 0.9, and
// whatever follows it on the inbound stream is noted and discarded.
#[test]
fn ZeroNineAfterOneDotOne() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET /first HTTP/1.1\r\nHost: h\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
            client(b"GET /second\n"),
            client(b"stray bytes after a short-form request"),
        ])
        .is_ok());

    assert_eq!(2, t.connp.tx_size());
    let tx2 = t.connp.tx(1).unwrap();
    assert_eq!(tx2.request_protocol_number, HtpProtocol::V0_9);
    assert_eq!(tx2.request_progress, HtpRequestProgress::COMPLETE);
    assert!(t.connp.conn.flags.is_set(ConnectionFlags::HTTP_0_9_EXTRA));
}

// For any split of the input into chunks, the parsed result must be
// identical. Feed a two-transaction conversation byte by byte and
// compare against the whole-buffer run.
#[test]
fn ChunkingIndependence() {
    let request: &[u8] = b"POST /form HTTP/1.1\r\nHost: www.example.com\r\n\
          Transfer-Encoding: chunked\r\n\r\n3\r\nkey\r\n5\r\n=val1\r\n0\r\n\r\n";
    let response: &[u8] =
        b"HTTP/1.1 200 OK\r\nServer: Apache\r\nContent-Length: 12\r\n\r\nhello world\n";

    let mut whole = Test::new(test_config());
    assert!(whole
        .run(vec![client(request), server(response)])
        .is_ok());

    let mut split = Test::new(test_config());
    let mut chunks = Vec::new();
    for byte in request {
        chunks.push(client(std::slice::from_ref(byte)));
    }
    for byte in response {
        chunks.push(server(std::slice::from_ref(byte)));
    }
    assert!(split.run(chunks).is_ok());

    let tx_whole = whole.connp.tx(0).unwrap();
    let tx_split = split.connp.tx(0).unwrap();
    // The multi-packet indicator is inherently chunking-dependent;
    // everything else must agree.
    assert_eq!(
        tx_whole.flags | HtpFlags::MULTI_PACKET_HEAD,
        tx_split.flags | HtpFlags::MULTI_PACKET_HEAD
    );
    assert_eq!(
        tx_whole.request_transfer_coding,
        tx_split.request_transfer_coding
    );
    assert_eq!(tx_whole.request_message_len, tx_split.request_message_len);
    assert_eq!(tx_whole.request_entity_len, tx_split.request_entity_len);
    assert_eq!(
        tx_whole.response_message_len,
        tx_split.response_message_len
    );
    assert_eq!(tx_whole.response_entity_len, tx_split.response_entity_len);
    assert_eq!(request_data_concat(tx_whole), request_data_concat(tx_split));
    assert_eq!(
        response_data_concat(tx_whole),
        response_data_concat(tx_split)
    );
    let whole_headers: Vec<(&[u8], &[u8])> = (&tx_whole.request_headers)
        .into_iter()
        .map(|(_, header)| (header.name.as_slice(), header.value.as_slice()))
        .collect();
    let split_headers: Vec<(&[u8], &[u8])> = (&tx_split.request_headers)
        .into_iter()
        .map(|(_, header)| (header.name.as_slice(), header.value.as_slice()))
        .collect();
    assert_eq!(whole_headers, split_headers);
}

// Repeated headers coalesce into one entry joined with ", ", flagged as
// repeated.
#[test]
fn HeaderCoalescing() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"GET / HTTP/1.1\r\nHost: h\r\nSame-Name: 1\r\nSame-Name: 2\r\n\
                  same-name: 3\r\n\r\n"
            ),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    let (_, header) = tx.request_headers.get_nocase("same-name").unwrap();
    assert!(header.value.eq_slice("1, 2, 3"));
    assert!(header.flags.is_set(HtpFlags::FIELD_REPEATED));
    // One entry, not three.
    assert_eq!(
        1,
        (&tx.request_headers)
            .into_iter()
            .filter(|(_, h)| h.name.cmp_nocase("same-name") == std::cmp::Ordering::Equal)
            .count()
    );
}

// A folded header line is joined to its predecessor.
#[test]
fn HeaderFolding() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\nHost: h\r\nValid-Folding: 2\r\n    2\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    let (_, header) = tx.request_headers.get_nocase("valid-folding").unwrap();
    assert!(header.value.eq_slice("2    2"));
    assert!(header.flags.is_set(HtpFlags::FIELD_FOLDED));
}

// Request headers split across packets raise MULTI_PACKET_HEAD.
#[test]
fn MultiPacketHead() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\nHost: h\r\n"),
            client(b"User-Agent: Mozilla\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::MULTI_PACKET_HEAD));
}

// Two requests sent before the first response makes the connection
// pipelined.
#[test]
fn Pipelining() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"GET /one HTTP/1.1\r\nHost: h\r\n\r\nGET /two HTTP/1.1\r\nHost: h\r\n\r\n"
            ),
            server(
                b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n\
                  HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"
            ),
        ])
        .is_ok());

    assert_eq!(2, t.connp.tx_size());
    assert!(t.connp.conn.flags.is_set(ConnectionFlags::PIPELINED));
    assert!(t.connp.tx(0).unwrap().is_complete());
    assert!(t.connp.tx(1).unwrap().is_complete());
}

// When the URI and the Host header disagree, the URI wins and the
// transaction is flagged ambiguous.
#[test]
fn HostAmbiguous() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET http://www.example.com/ HTTP/1.1\r\nHost: www.example.org\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::HOST_AMBIGUOUS));
    assert!(tx
        .request_hostname
        .as_ref()
        .unwrap()
        .eq_slice("www.example.com"));
}

#[test]
fn HostMissing() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::HOST_MISSING));
    assert!(tx.request_hostname.is_none());
}

// Callbacks observe the request and response stages in their defined
// total order.
#[test]
fn CallbackOrdering() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\nOK"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    let user_data = tx.user_data::<MainUserData>().unwrap();
    assert_eq!(
        user_data.events,
        vec![
            "transaction_start",
            "request_start",
            "request_line",
            "request_headers",
            "request_body_data",
            "request_complete",
            "response_start",
            "response_line",
            "response_headers",
            "response_body_data",
            "response_complete",
            "transaction_complete",
        ]
    );
}

// A STOP returned from a callback halts the direction; further data is
// dropped, not errored.
#[test]
fn StopCallback() {
    fn stop_on_start(_tx: &mut Transaction) -> Result<()> {
        Err(HtpStatus::STOP)
    }
    let mut cfg = test_config();
    cfg.register_request_start(stop_on_start);
    let mut connp = ConnectionParser::new(cfg);
    connp.open(None, None, None, None, None);

    let rc = connp.request_data(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n", None);
    assert_eq!(rc, HtpStreamState::STOP);
    let rc = connp.request_data(b"more data", None);
    assert_eq!(rc, HtpStreamState::STOP);
}

// A zero-length chunk is only valid once the stream was declared closed.
#[test]
fn ZeroLengthChunk() {
    let mut connp = ConnectionParser::new(test_config());
    connp.open(None, None, None, None, None);
    assert_eq!(connp.request_data(b"", None), HtpStreamState::CLOSED);
}

// A response without Content-Length runs until the stream closes.
#[test]
fn ResponseWithoutContentLength() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nServer: Apache\r\n\r\nbody until close"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.response_transfer_coding, HtpTransferCoding::IDENTITY);
    assert!(tx.is_complete());
    assert_eq!(response_data_concat(tx), b"body until close");
}

// An invalid request chunk length is fatal for the inbound direction.
#[test]
fn InvalidRequestChunkLength() {
    let mut connp = ConnectionParser::new(test_config());
    connp.open(None, None, None, None, None);
    let rc = connp.request_data(
        b"POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\nXYZ\r\nhello\r\n",
        None,
    );
    assert_eq!(rc, HtpStreamState::ERROR);
    let rc = connp.request_data(b"more", None);
    assert_eq!(rc, HtpStreamState::ERROR);
}

// An invalid response chunk length demotes the body to identity until
// the stream closes.
#[test]
fn InvalidResponseChunkLength() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"),
            server(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                  not-a-chunk-length\r\ndata\r\n"
            ),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.response_transfer_coding, HtpTransferCoding::IDENTITY);
    assert!(tx.is_complete());
    assert_eq!(
        response_data_concat(tx),
        b"not-a-chunk-length\r\ndata\r\n"
    );
}

// A response line that does not resemble a status line is body.
#[test]
fn ResponseLineAsBody() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"),
            server(b"<html>not a status line</html>\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::STATUS_LINE_INVALID));
    assert_eq!(response_data_concat(tx), b"<html>not a status line</html>\n");
}

#[test]
fn CookiesAndBasicAuth() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"GET / HTTP/1.1\r\nHost: h\r\nCookie: a=1; b=2\r\n\
                  Authorization: Basic dXNlcjpwYXNz\r\n\r\n"
            ),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(2, tx.request_cookies.size());
    assert!(tx.request_cookies.get_nocase("a").unwrap().1.eq_slice("1"));
    assert!(tx.request_cookies.get_nocase("b").unwrap().1.eq_slice("2"));
    assert!(tx
        .request_auth_username
        .as_ref()
        .unwrap()
        .eq_slice("user"));
    assert!(tx
        .request_auth_password
        .as_ref()
        .unwrap()
        .eq_slice("pass"));
}

// A gzipped response body is decompressed before it reaches the body
// data hooks; the entity length counts decoded bytes while the message
// length counts wire bytes.
#[test]
fn GzipResponse() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let plain = b"The quick brown fox jumps over the lazy dog, repeatedly and at length.";
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut response = Vec::new();
    response.extend_from_slice(
        format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            compressed.len()
        )
        .as_bytes(),
    );
    response.extend_from_slice(&compressed);

    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"),
            server(&response),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.response_message_len, compressed.len() as i64);
    assert_eq!(tx.response_entity_len, plain.len() as i64);
    assert_eq!(response_data_concat(tx), plain.to_vec());
}

// Leading empty lines before a request line are counted and ignored.
#[test]
fn IgnoredEmptyLines() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"\r\n\r\nGET / HTTP/1.1\r\nHost: h\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    assert_eq!(1, t.connp.tx_size());
    let tx = t.connp.tx(0).unwrap();
    assert_eq!(2, tx.request_ignored_lines);
    assert!(tx.is_complete());
}

// Invalid header shapes accumulate field flags but parsing continues.
#[test]
fn PermissiveHeaderAnomalies() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(
                b"GET / HTTP/1.1\r\nHost: h\r\nNoColonHere\r\n\
                  Invalid Name: 4\r\nEmpty-Value:\r\n\r\n"
            ),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::FIELD_UNPARSEABLE));
    assert!(tx.flags.is_set(HtpFlags::FIELD_INVALID));
    assert!(tx.is_complete());
    // The colonless line is kept as a header with an empty name.
    let (_, header) = tx.request_headers.get_nocase("").unwrap();
    assert!(header.value.eq_slice("NoColonHere"));
    let (_, header) = tx.request_headers.get_nocase("invalid name").unwrap();
    assert!(header.value.eq_slice("4"));
}

// The request line terminator variants are recorded on the transaction.
#[test]
fn BareLfRequestLine() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\nHost: h\n\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert!(tx.flags.is_set(HtpFlags::LF_LINE));
    assert!(tx.is_complete());
}

// Responses delivered before their requests get a placeholder
// transaction so inspection can continue.
#[test]
fn ResponseWithoutRequest() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"
        )])
        .is_ok());

    assert_eq!(1, t.connp.tx_size());
    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.request_progress, HtpRequestProgress::COMPLETE);
    assert!(tx.response_status_number.eq_num(200));
}

// Field limit overflow poisons the direction.
#[test]
fn FieldLimit() {
    let mut cfg = test_config();
    cfg.set_field_limit(32);
    let mut connp = ConnectionParser::new(cfg);
    connp.open(None, None, None, None, None);
    // A request line fragment longer than the limit, with no LF in
    // sight, must be rejected rather than buffered forever.
    let rc = connp.request_data(
        b"GET /waaaaaaaaaaaaaaaaaaaaaaaaaaay-too-long-for-the-limit",
        None,
    );
    assert_eq!(rc, HtpStreamState::ERROR);
}

// Anomalies surface as log records on the connection, which the
// embedding application drains.
#[test]
fn LogDraining() {
    let mut t = Test::new(test_config());
    assert!(t
        .run(vec![
            client(b"GET / HTTP/1.1\r\nHost: h\r\nSame-Name: 1\r\nSame-Name: 2\r\n\r\n"),
            server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let logs = t.connp.conn.get_logs();
    assert!(logs
        .iter()
        .any(|log| log.msg.code == htx::log::HtpLogCode::REQUEST_HEADER_REPETITION));
    // Drained once; the channel is now empty.
    assert!(t.connp.conn.get_next_log().is_none());
}

// Closing only the inbound stream finalizes the request but leaves the
// response side open.
#[test]
fn RequestCloseOnly() {
    let mut t = Test::new(test_config());
    assert!(t
        .run_ex(
            vec![client(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n")],
            false,
        )
        .is_ok());
    t.connp.request_close(None);

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.request_progress, HtpRequestProgress::COMPLETE);
    assert_eq!(tx.response_progress, HtpResponseProgress::NOT_STARTED);
    assert_eq!(t.connp.request_status, HtpStreamState::CLOSED);
    assert_eq!(t.connp.response_status, HtpStreamState::OPEN);
}

fn default_config() -> Config {
    let mut cfg = Config::default();
    cfg.set_server_personality(htx::config::HtpServerPersonality::GENERIC)
        .unwrap();
    cfg
}

// The PUT request body is routed to the upload file sink.
#[test]
fn PutUpload() {
    let mut t = Test::new(default_config());
    assert!(t
        .run(vec![
            client(b"PUT /file HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello"),
            server(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n"),
        ])
        .is_ok());

    let tx = t.connp.tx(0).unwrap();
    assert_eq!(tx.request_entity_len, 5);
    assert_eq!(tx.request_progress, HtpRequestProgress::COMPLETE);
}
