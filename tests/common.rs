#![allow(dead_code)]
use htx::{
    bstr::Bstr,
    config::{Config, HtpServerPersonality},
    connection_parser::{ConnectionParser, HtpStreamState},
    error::Result,
    transaction::{Data, Transaction},
};
use std::convert::TryInto;
use std::net::{IpAddr, Ipv4Addr};
use time::OffsetDateTime;

/// One chunk of connection data, inbound or outbound.
#[derive(Debug, Clone)]
pub enum Chunk {
    Client(Vec<u8>),
    Server(Vec<u8>),
}

/// Per-transaction record of what the callbacks observed, attached as
/// transaction user data by the harness.
#[derive(Default)]
pub struct MainUserData {
    pub request_data: Vec<Bstr>,
    pub response_data: Vec<Bstr>,
    pub events: Vec<&'static str>,
}

#[derive(Debug)]
pub enum TestError {
    StreamError,
}

fn attach_user_data(tx: &mut Transaction) -> Result<()> {
    tx.set_user_data(Box::new(MainUserData::default()));
    tx.user_data_mut::<MainUserData>()
        .unwrap()
        .events
        .push("transaction_start");
    Ok(())
}

macro_rules! event_recorder {
    ($fn_name:ident, $event:expr) => {
        fn $fn_name(tx: &mut Transaction) -> Result<()> {
            if let Some(user_data) = tx.user_data_mut::<MainUserData>() {
                user_data.events.push($event);
            }
            Ok(())
        }
    };
}

event_recorder!(request_start, "request_start");
event_recorder!(request_line, "request_line");
event_recorder!(request_headers, "request_headers");
event_recorder!(request_trailer, "request_trailer");
event_recorder!(request_complete, "request_complete");
event_recorder!(response_start, "response_start");
event_recorder!(response_line, "response_line");
event_recorder!(response_headers, "response_headers");
event_recorder!(response_trailer, "response_trailer");
event_recorder!(response_complete, "response_complete");
event_recorder!(transaction_complete, "transaction_complete");

fn request_body_data(d: &mut Data) -> Result<()> {
    let data = Bstr::from(d.as_slice());
    if let Some(user_data) = d.tx_mut().user_data_mut::<MainUserData>() {
        if !data.is_empty() {
            user_data.request_data.push(data);
            user_data.events.push("request_body_data");
        }
    }
    Ok(())
}

fn response_body_data(d: &mut Data) -> Result<()> {
    let data = Bstr::from(d.as_slice());
    if let Some(user_data) = d.tx_mut().user_data_mut::<MainUserData>() {
        if !data.is_empty() {
            user_data.response_data.push(data);
            user_data.events.push("response_body_data");
        }
    }
    Ok(())
}

/// The configuration used by most tests.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.set_server_personality(HtpServerPersonality::APACHE_2)
        .unwrap();
    cfg.set_parse_multipart(true);
    cfg.register_transaction_start(attach_user_data);
    cfg.register_request_start(request_start);
    cfg.register_request_line(request_line);
    cfg.register_request_headers(request_headers);
    cfg.register_request_trailer(request_trailer);
    cfg.register_request_complete(request_complete);
    cfg.register_request_body_data(request_body_data);
    cfg.register_response_start(response_start);
    cfg.register_response_line(response_line);
    cfg.register_response_headers(response_headers);
    cfg.register_response_trailer(response_trailer);
    cfg.register_response_complete(response_complete);
    cfg.register_response_body_data(response_body_data);
    cfg.register_transaction_complete(transaction_complete);
    cfg
}

/// Drives a connection parser over a scripted exchange, reproducing the
/// way a capture layer would feed it: in stream order, with DATA_OTHER
/// leftovers resupplied after the other direction has made progress.
pub struct Test {
    pub connp: ConnectionParser,
}

impl Test {
    pub fn new(cfg: Config) -> Self {
        let mut connp = ConnectionParser::new(cfg);
        connp.open(
            Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            Some(10000),
            Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            Some(80),
            Some(OffsetDateTime::now_utc()),
        );
        Test { connp }
    }

    pub fn run(&mut self, chunks: Vec<Chunk>) -> std::result::Result<(), TestError> {
        self.run_ex(chunks, true)
    }

    pub fn run_ex(
        &mut self,
        chunks: Vec<Chunk>,
        close: bool,
    ) -> std::result::Result<(), TestError> {
        let mut request_buf: Option<Vec<u8>> = None;
        let mut response_buf: Option<Vec<u8>> = None;
        for chunk in chunks {
            match chunk {
                Chunk::Client(data) => {
                    let rc = self.connp.request_data(data.as_slice(), None);
                    if rc == HtpStreamState::ERROR {
                        return Err(TestError::StreamError);
                    }
                    if rc == HtpStreamState::DATA_OTHER {
                        let consumed: usize = self
                            .connp
                            .request_data_consumed()
                            .try_into()
                            .expect("request_data_consumed");
                        request_buf = Some(data[consumed..].to_vec());
                    }
                }
                Chunk::Server(data) => {
                    // If there is leftover data from before, use it first.
                    if let Some(ref response_remaining) = response_buf {
                        let rc = self.connp.response_data(response_remaining, None);
                        response_buf = None;
                        if rc == HtpStreamState::ERROR {
                            return Err(TestError::StreamError);
                        }
                    }
                    let rc = self.connp.response_data(data.as_slice(), None);
                    if rc == HtpStreamState::ERROR {
                        return Err(TestError::StreamError);
                    }
                    if rc == HtpStreamState::DATA_OTHER {
                        let consumed: usize = self
                            .connp
                            .response_data_consumed()
                            .try_into()
                            .expect("response_data_consumed");
                        response_buf = Some(data[consumed..].to_vec());
                    }
                    // The request side may have been waiting on us.
                    if let Some(ref request_remaining) = request_buf {
                        let rc = self.connp.request_data(request_remaining, None);
                        request_buf = None;
                        if rc == HtpStreamState::ERROR {
                            return Err(TestError::StreamError);
                        }
                    }
                }
            }
        }
        // Clean up any remaining server data.
        if let Some(ref response_remaining) = response_buf {
            let rc = self.connp.response_data(response_remaining, None);
            if rc == HtpStreamState::ERROR {
                return Err(TestError::StreamError);
            }
        }
        if close {
            self.connp.close(Some(OffsetDateTime::now_utc()));
        }
        Ok(())
    }
}

/// Shorthand for building a client chunk.
pub fn client(data: &[u8]) -> Chunk {
    Chunk::Client(data.to_vec())
}

/// Shorthand for building a server chunk.
pub fn server(data: &[u8]) -> Chunk {
    Chunk::Server(data.to_vec())
}
