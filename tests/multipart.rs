#![allow(non_snake_case)]
use htx::{
    config::{Config, HtpServerPersonality},
    multipart::{HtpMultipartType, MultipartFlags, MultipartParser},
    util::FlagOperations,
};

mod common;
use common::{client, server, test_config, Test};

fn parser_config() -> Config {
    let mut cfg = Config::default();
    cfg.set_server_personality(HtpServerPersonality::APACHE_2)
        .unwrap();
    cfg.set_parse_multipart(true);
    cfg
}

/// Builds a multipart POST request around the given body.
fn multipart_request(boundary: &str, body: &[u8]) -> Vec<u8> {
    let mut request = Vec::new();
    request.extend_from_slice(
        format!(
            "POST /upload HTTP/1.1\r\nHost: h\r\n\
             Content-Type: multipart/form-data; boundary={}\r\n\
             Content-Length: {}\r\n\r\n",
            boundary,
            body.len()
        )
        .as_bytes(),
    );
    request.extend_from_slice(body);
    request
}

// One part, boundary fed through the connection parser in a single
// chunk and again byte by byte; the results must be identical.
#[test]
fn OnePartAnyChunking() {
    let body = b"--abc\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nhi\r\n--abc--\r\n";
    let request = multipart_request("abc", body);

    for byte_at_a_time in &[false, true] {
        let mut t = Test::new(test_config());
        let chunks = if *byte_at_a_time {
            request
                .iter()
                .map(|byte| client(std::slice::from_ref(byte)))
                .collect()
        } else {
            vec![client(&request)]
        };
        let mut chunks = chunks;
        chunks.push(server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"));
        assert!(t.run(chunks).is_ok());

        let tx = t.connp.tx(0).unwrap();
        let mpartp = tx.request_mpartp.as_ref().unwrap();
        let multipart = &mpartp.multipart;

        assert_eq!(2, multipart.boundary_count);
        assert!(multipart.flags.is_set(MultipartFlags::SEEN_LAST_BOUNDARY));
        assert!(!multipart.flags.is_set(MultipartFlags::HAS_EPILOGUE));
        assert_eq!(1, multipart.parts.len());

        let part = &multipart.parts[0];
        assert_eq!(part.part_type, HtpMultipartType::TEXT);
        assert!(part.name.as_ref().unwrap().eq_slice("f"));
        assert!(part.value.as_ref().unwrap().eq_slice("hi"));

        // Text parts become request parameters.
        assert!(tx.request_params.get_nocase("f").unwrap().1.eq_slice("hi"));
    }
}

#[test]
fn TwoTextParts() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"B", 0);
    parser
        .parse(
            b"--B\r\nContent-Disposition: form-data; name=\"field1\"\r\n\r\nvalue1\r\n\
              --B\r\nContent-Disposition: form-data; name=\"field2\"\r\n\r\nvalue2\r\n--B--\r\n",
        )
        .unwrap();
    parser.finalize().unwrap();

    let multipart = &parser.multipart;
    assert_eq!(3, multipart.boundary_count);
    assert_eq!(2, multipart.parts.len());
    assert!(multipart.flags.is_set(MultipartFlags::SEEN_LAST_BOUNDARY));
    assert!(!multipart.flags.is_set(MultipartFlags::INCOMPLETE));

    assert!(multipart.parts[0].name.as_ref().unwrap().eq_slice("field1"));
    assert!(multipart.parts[0]
        .value
        .as_ref()
        .unwrap()
        .eq_slice("value1"));
    assert!(multipart.parts[1].name.as_ref().unwrap().eq_slice("field2"));
    assert!(multipart.parts[1]
        .value
        .as_ref()
        .unwrap()
        .eq_slice("value2"));
    // Part headers were recorded.
    assert!(multipart.parts[0]
        .headers
        .get_nocase("content-disposition")
        .is_some());
}

// A partial boundary match that fails must replay every byte, in order,
// as part data.
#[test]
fn BoundaryRewind() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"BBB", 0);
    parser
        .parse(
            b"--BBB\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\n\
              line1\r\n--BBQdata\r\n--BBB--\r\n",
        )
        .unwrap();
    parser.finalize().unwrap();

    let multipart = &parser.multipart;
    assert_eq!(1, multipart.parts.len());
    assert!(multipart.parts[0]
        .value
        .as_ref()
        .unwrap()
        .eq_slice("line1\r\n--BBQdata"));
}

// The same payload split at every possible position produces the same
// parts; in particular a CR on a chunk edge must not break boundary
// detection.
#[test]
fn SplitAtEveryPosition() {
    let body: &[u8] = b"--abc\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\n\
          first\r\nsecond\r\n--abc--\r\n";
    for split in 1..body.len() {
        let cfg = parser_config();
        let mut parser = MultipartParser::new(&cfg, b"abc", 0);
        parser.parse(&body[..split]).unwrap();
        parser.parse(&body[split..]).unwrap();
        parser.finalize().unwrap();

        let multipart = &parser.multipart;
        assert_eq!(1, multipart.parts.len(), "split at {}", split);
        assert!(
            multipart.parts[0]
                .value
                .as_ref()
                .unwrap()
                .eq_slice("first\r\nsecond"),
            "split at {}",
            split
        );
        assert!(multipart.flags.is_set(MultipartFlags::SEEN_LAST_BOUNDARY));
    }
}

// Bytes before the first boundary form the preamble; bytes after the
// last boundary form the epilogue.
#[test]
fn PreambleAndEpilogue() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(
            b"goes first\r\n--abc\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\n\
              hi\r\n--abc--\r\nand this goes last",
        )
        .unwrap();
    parser.finalize().unwrap();

    let multipart = &parser.multipart;
    assert!(multipart.flags.is_set(MultipartFlags::HAS_PREAMBLE));
    assert!(multipart.flags.is_set(MultipartFlags::HAS_EPILOGUE));
    assert!(!multipart.flags.is_set(MultipartFlags::INCOMPLETE));
    assert_eq!(3, multipart.parts.len());

    assert_eq!(multipart.parts[0].part_type, HtpMultipartType::PREAMBLE);
    assert!(multipart.parts[0].value.as_ref().unwrap().eq_slice("goes first"));
    assert_eq!(multipart.parts[1].part_type, HtpMultipartType::TEXT);
    assert_eq!(multipart.parts[2].part_type, HtpMultipartType::EPILOGUE);
    assert!(multipart.parts[2]
        .value
        .as_ref()
        .unwrap()
        .eq_slice("and this goes last"));
}

// A proper part arriving after the last boundary is an evasion
// indicator, not an epilogue.
#[test]
fn PartAfterLastBoundary() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(
            b"--abc\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nhi\r\n--abc--\r\n\
              --abc\r\nContent-Disposition: form-data; name=\"g\"\r\n\r\nbye\r\n--abc--\r\n",
        )
        .unwrap();
    parser.finalize().unwrap();

    assert!(parser
        .multipart
        .flags
        .is_set(MultipartFlags::PART_AFTER_LAST_BOUNDARY));
}

// A payload that ends without the closing delimiter is incomplete.
#[test]
fn AbruptEnd() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(b"--abc\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\npartial data")
        .unwrap();
    parser.finalize().unwrap();

    let multipart = &parser.multipart;
    assert!(multipart.flags.is_set(MultipartFlags::INCOMPLETE));
    assert!(!multipart.flags.is_set(MultipartFlags::SEEN_LAST_BOUNDARY));
    assert_eq!(1, multipart.parts.len());
    assert!(multipart.parts[0]
        .value
        .as_ref()
        .unwrap()
        .eq_slice("partial data"));
}

// Folded part headers are accepted and flagged.
#[test]
fn FoldedPartHeader() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(
            b"--abc\r\nContent-Disposition: form-data;\r\n name=\"f\"\r\n\r\nhi\r\n--abc--\r\n",
        )
        .unwrap();
    parser.finalize().unwrap();

    let multipart = &parser.multipart;
    assert!(multipart
        .flags
        .is_set(MultipartFlags::PART_HEADER_FOLDING));
    assert!(multipart.parts[0].name.as_ref().unwrap().eq_slice("f"));
}

// An unknown Content-Disposition parameter taints the payload.
#[test]
fn UnknownContentDispositionParam() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(
            b"--abc\r\nContent-Disposition: form-data; name=\"f\"; rogue=\"x\"\r\n\r\n\
              hi\r\n--abc--\r\n",
        )
        .unwrap();
    parser.finalize().unwrap();

    assert!(parser
        .multipart
        .flags
        .is_set(MultipartFlags::CD_PARAM_UNKNOWN));
}

// An unquoted Content-Disposition value is a syntax error.
#[test]
fn UnquotedContentDispositionParam() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(b"--abc\r\nContent-Disposition: form-data; name=f\r\n\r\nhi\r\n--abc--\r\n")
        .unwrap();
    parser.finalize().unwrap();

    assert!(parser
        .multipart
        .flags
        .is_set(MultipartFlags::CD_SYNTAX_INVALID));
    assert!(parser.multipart.flags.is_set(MultipartFlags::PART_UNKNOWN));
}

// Coexistence of name and filename promotes the part to a file, and
// with extraction enabled its content lands in a temporary file.
#[test]
fn FilePartExtraction() {
    let tmpdir = tempfile::tempdir().unwrap();
    let mut cfg = parser_config();
    cfg.set_extract_request_files(true, tmpdir.path().to_str());

    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(
            b"--abc\r\n\
              Content-Disposition: form-data; name=\"f\"; filename=\"file.bin\"\r\n\
              Content-Type: application/octet-stream\r\n\r\n\
              FILECONTENT\r\n--abc--\r\n",
        )
        .unwrap();
    parser.finalize().unwrap();

    let part = &parser.multipart.parts[0];
    assert_eq!(part.part_type, HtpMultipartType::FILE);
    assert!(part
        .content_type
        .as_ref()
        .unwrap()
        .eq_slice("application/octet-stream"));
    let file = part.file.as_ref().unwrap();
    assert!(file.filename.as_ref().unwrap().eq_slice("file.bin"));
    assert_eq!(file.len, 11);

    let tmpfile = file.tmpfile.as_ref().unwrap();
    let stored = std::fs::read(tmpfile.path()).unwrap();
    assert_eq!(stored, b"FILECONTENT");
}

// Whitespace after a boundary is tolerated but noted; other content is
// a stronger signal.
#[test]
fn BoundaryTrailingCharacters() {
    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser
        .parse(
            b"--abc \t\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nhi\r\n--abcX\r\n--abc--\r\n",
        )
        .unwrap();
    parser.finalize().unwrap();

    let multipart = &parser.multipart;
    assert!(multipart
        .flags
        .is_set(MultipartFlags::BBOUNDARY_LWS_AFTER));
    assert!(multipart
        .flags
        .is_set(MultipartFlags::BBOUNDARY_NLWS_AFTER));
}

// Boundary matching is case-sensitive by default; the config toggle
// switches to lowercased matching.
#[test]
fn BoundaryCaseSensitivity() {
    let body: &[u8] =
        b"--AbC\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nhi\r\n--AbC--\r\n";

    let cfg = parser_config();
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser.parse(body).unwrap();
    parser.finalize().unwrap();
    // With exact matching, the differently-cased delimiters never match.
    assert_eq!(0, parser.multipart.boundary_count);
    assert!(parser.multipart.flags.is_set(MultipartFlags::INCOMPLETE));

    let mut cfg = parser_config();
    cfg.set_multipart_boundary_case_insensitive(true);
    let mut parser = MultipartParser::new(&cfg, b"abc", 0);
    parser.parse(body).unwrap();
    parser.finalize().unwrap();
    assert_eq!(2, parser.multipart.boundary_count);
    assert!(parser.multipart.parts[0].name.as_ref().unwrap().eq_slice("f"));
}
