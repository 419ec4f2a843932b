use crate::{
    error::Result,
    transaction::{Data, Transaction},
    util::FileData,
    HtpStatus,
};

/// External callback receiving a transaction.
pub type TxCallbackFn = fn(tx: &mut Transaction) -> Result<()>;

/// External callback receiving a chunk of transaction data.
pub type DataCallbackFn = fn(data: &mut Data) -> Result<()>;

/// External callback receiving a chunk of file data.
pub type FileDataCallbackFn = fn(data: &mut FileData) -> Result<()>;

/// Registry of transaction callbacks.
#[derive(Clone, Default)]
pub struct TxHook {
    callbacks: Vec<TxCallbackFn>,
}

impl TxHook {
    /// Create a new hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback on this hook.
    pub fn register(&mut self, cbk_fn: TxCallbackFn) {
        self.callbacks.push(cbk_fn)
    }

    /// Run all registered callbacks in registration order. DECLINED from
    /// a callback means it was not interested; any other error
    /// short-circuits the run.
    pub fn run_all(&self, tx: &mut Transaction) -> Result<()> {
        for cbk_fn in &self.callbacks {
            match cbk_fn(tx) {
                Ok(()) | Err(HtpStatus::DECLINED) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Registry of data callbacks.
#[derive(Clone, Default)]
pub struct DataHook {
    callbacks: Vec<DataCallbackFn>,
}

impl DataHook {
    /// Create a new hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback on this hook.
    pub fn register(&mut self, cbk_fn: DataCallbackFn) {
        self.callbacks.push(cbk_fn)
    }

    /// Run all registered callbacks in registration order. DECLINED from
    /// a callback means it was not interested; any other error
    /// short-circuits the run.
    pub fn run_all(&self, data: &mut Data) -> Result<()> {
        for cbk_fn in &self.callbacks {
            match cbk_fn(data) {
                Ok(()) | Err(HtpStatus::DECLINED) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Registry of file data callbacks.
#[derive(Clone, Default)]
pub struct FileDataHook {
    callbacks: Vec<FileDataCallbackFn>,
}

impl FileDataHook {
    /// Create a new hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback on this hook.
    pub fn register(&mut self, cbk_fn: FileDataCallbackFn) {
        self.callbacks.push(cbk_fn)
    }

    /// Run all registered callbacks in registration order. DECLINED from
    /// a callback means it was not interested; any other error
    /// short-circuits the run.
    pub fn run_all(&self, data: &mut FileData) -> Result<()> {
        for cbk_fn in &self.callbacks {
            match cbk_fn(data) {
                Ok(()) | Err(HtpStatus::DECLINED) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
