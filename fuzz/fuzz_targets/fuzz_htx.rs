#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate htx;

use htx::config::{Config, HtpServerPersonality};
use htx::connection_parser::{ConnectionParser, HtpStreamState};
use std::convert::TryInto;
use std::net::{IpAddr, Ipv4Addr};

#[derive(Debug)]
enum Chunk {
    Client(Vec<u8>),
    Server(Vec<u8>),
}

/// Splits a fuzz input into client and server chunks on ">>>" and "<<<"
/// marker lines.
fn chunks(input: &[u8]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = Vec::<u8>::new();
    let mut client = true;
    for line in input.split(|c| *c == b'\n') {
        if line.len() >= 3 && (line.starts_with(b">>>") || line.starts_with(b"<<<")) {
            if !current.is_empty() {
                if let Some(b'\n') = current.last() {
                    current.pop();
                }
                if let Some(b'\r') = current.last() {
                    current.pop();
                }
                let data = std::mem::take(&mut current);
                chunks.push(if client {
                    Chunk::Client(data)
                } else {
                    Chunk::Server(data)
                });
            }
            client = line[0] == b'>';
        } else {
            current.extend_from_slice(line);
            current.push(b'\n');
        }
    }
    current.pop();
    chunks.push(if client {
        Chunk::Client(current)
    } else {
        Chunk::Server(current)
    });
    chunks
}

fn run(input: &[u8]) {
    let mut cfg = Config::default();
    cfg.set_server_personality(HtpServerPersonality::APACHE_2)
        .unwrap();
    cfg.set_parse_multipart(true);
    let mut connp = ConnectionParser::new(cfg);
    connp.open(
        Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
        Some(10000),
        Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
        Some(80),
        None,
    );
    let mut request_buf: Option<Vec<u8>> = None;
    let mut response_buf: Option<Vec<u8>> = None;
    for chunk in chunks(input) {
        match chunk {
            Chunk::Client(data) => {
                let rc = connp.request_data(data.as_slice(), None);
                if rc == HtpStreamState::ERROR {
                    return;
                }
                if rc == HtpStreamState::DATA_OTHER {
                    let consumed: usize = connp.request_data_consumed().try_into().unwrap();
                    request_buf = Some(data[consumed..].to_vec());
                }
            }
            Chunk::Server(data) => {
                if let Some(ref remaining) = response_buf {
                    if connp.response_data(remaining, None) == HtpStreamState::ERROR {
                        return;
                    }
                    response_buf = None;
                }
                let rc = connp.response_data(data.as_slice(), None);
                if rc == HtpStreamState::ERROR {
                    return;
                }
                if rc == HtpStreamState::DATA_OTHER {
                    let consumed: usize = connp.response_data_consumed().try_into().unwrap();
                    response_buf = Some(data[consumed..].to_vec());
                }
                if let Some(ref remaining) = request_buf {
                    if connp.request_data(remaining, None) == HtpStreamState::ERROR {
                        return;
                    }
                    request_buf = None;
                }
            }
        }
    }
    if let Some(ref remaining) = response_buf {
        let _ = connp.response_data(remaining, None);
    }
    connp.close(None);
}

fuzz_target!(|data: &[u8]| {
    run(data);
});
