use crate::log::{Log, Message};
use crate::transaction::Transaction;
use std::{
    net::IpAddr,
    sync::mpsc::{channel, Receiver, Sender},
};
use time::OffsetDateTime;

/// Stores information about a single TCP flow and the transactions parsed
/// off it. The connection is the lifetime root: it owns the transaction
/// arena and the log channel.
pub struct Connection {
    /// Client IP address.
    pub client_addr: Option<IpAddr>,
    /// Client port.
    pub client_port: Option<u16>,
    /// Server IP address.
    pub server_addr: Option<IpAddr>,
    /// Server port.
    pub server_port: Option<u16>,

    /// Transactions carried out on this connection, in order of appearance.
    transactions: Vec<Transaction>,
    /// Log messages associated with this connection.
    log_channel: (Sender<Message>, Receiver<Message>),

    /// Parsing flags.
    pub flags: u8,
    /// When was this connection opened?
    pub open_timestamp: Option<OffsetDateTime>,
    /// When was this connection closed?
    pub close_timestamp: Option<OffsetDateTime>,
    /// Inbound data counter.
    pub request_data_counter: u64,
    /// Outbound data counter.
    pub response_data_counter: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            client_addr: None,
            client_port: None,
            server_addr: None,
            server_port: None,
            transactions: Vec::new(),
            log_channel: channel(),
            flags: 0,
            open_timestamp: None,
            close_timestamp: None,
            request_data_counter: 0,
            response_data_counter: 0,
        }
    }
}

impl Connection {
    /// Opens a connection. This function will essentially only store the
    /// provided data for future reference.
    pub fn open(
        &mut self,
        client_addr: Option<IpAddr>,
        client_port: Option<u16>,
        server_addr: Option<IpAddr>,
        server_port: Option<u16>,
        timestamp: Option<OffsetDateTime>,
    ) {
        self.client_addr = client_addr;
        self.client_port = client_port;
        self.server_addr = server_addr;
        self.server_port = server_port;
        self.open_timestamp = timestamp;
    }

    /// Closes the connection.
    pub fn close(&mut self, timestamp: Option<OffsetDateTime>) {
        if timestamp.is_some() {
            self.close_timestamp = timestamp;
        }
    }

    /// Appends a transaction to the arena, returning its index.
    pub fn push_tx(&mut self, tx: Transaction) {
        self.transactions.push(tx)
    }

    /// Retrieves a transaction by its index.
    pub fn tx(&self, index: usize) -> Option<&Transaction> {
        self.transactions.get(index)
    }

    /// Retrieves a mutable transaction by its index.
    pub fn tx_mut(&mut self, index: usize) -> Option<&mut Transaction> {
        self.transactions.get_mut(index)
    }

    /// The number of transactions seen on this connection so far.
    pub fn tx_size(&self) -> usize {
        self.transactions.len()
    }

    /// Keeps track of inbound data.
    pub fn track_inbound_data(&mut self, len: usize) {
        self.request_data_counter = self.request_data_counter.wrapping_add(len as u64);
    }

    /// Keeps track of outbound data.
    pub fn track_outbound_data(&mut self, len: usize) {
        self.response_data_counter = self.response_data_counter.wrapping_add(len as u64);
    }

    /// Returns the sender half of the log channel.
    pub fn get_sender(&self) -> &Sender<Message> {
        &self.log_channel.0
    }

    /// Drains and returns all log records received so far.
    pub fn get_logs(&self) -> Vec<Log> {
        let mut logs = Vec::with_capacity(8);
        while let Ok(message) = self.log_channel.1.try_recv() {
            logs.push(Log::new(self, message))
        }
        logs
    }

    /// Returns the next log record, if any.
    pub fn get_next_log(&self) -> Option<Log> {
        self.log_channel
            .1
            .try_recv()
            .map(|message| Log::new(self, message))
            .ok()
    }
}

impl PartialEq for Connection {
    /// Two connections are equal when their endpoints match.
    fn eq(&self, rhs: &Self) -> bool {
        self.client_addr == rhs.client_addr
            && self.client_port == rhs.client_port
            && self.server_addr == rhs.server_addr
            && self.server_port == rhs.server_port
    }
}
