use crate::{
    error::Result,
    hook::{DataHook, FileDataHook, TxHook},
    log::HtpLogLevel,
};

/// Server personalities, which decide how ambiguous constructs such as
/// whitespace-only lines are interpreted.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(non_camel_case_types)]
pub enum HtpServerPersonality {
    /// Minimal personality: no personality-specific quirks.
    MINIMAL,
    /// A generic personality with reasonable defaults.
    GENERIC,
    /// Mimics the behavior of IDS evasion-resistant parsing.
    IDS,
    /// Mimics the behavior of Apache 2.x.
    APACHE_2,
    /// Mimics the behavior of IIS 5.0, as shipped with Windows 2000.
    IIS_5_0,
}

/// Parser configuration. A Config is built up front and moved into the
/// ConnectionParser; it is not shared or mutated afterwards.
#[derive(Clone)]
pub struct Config {
    /// The maximum size of the buffer that is used when the current input
    /// chunk does not contain all the necessary data (e.g., a header line
    /// that spans several packets).
    pub field_limit: usize,
    /// Log level, which will be used when deciding whether to store or
    /// ignore the messages issued by the parser.
    pub log_level: HtpLogLevel,
    /// Server personality identifier.
    pub server_personality: HtpServerPersonality,
    /// Whether to decompress compressed response bodies.
    pub response_decompression_enabled: bool,
    /// Whether to parse request cookies.
    pub parse_request_cookies: bool,
    /// Whether to parse HTTP Authentication headers.
    pub parse_request_auth: bool,
    /// Whether to parse multipart/form-data request bodies.
    pub parse_multipart: bool,
    /// Whether multipart boundary matching lowercases both sides first.
    pub multipart_boundary_case_insensitive: bool,
    /// Whether to extract files from requests using POST upload or
    /// multipart/form-data.
    pub extract_request_files: bool,
    /// How many files are allowed to be extracted per transaction.
    pub extract_request_files_limit: u32,
    /// The directory where the extracted files are stored.
    pub tmpdir: String,

    /// Request start hook, invoked when the parser receives the first
    /// byte of a new request.
    pub hook_request_start: TxHook,
    /// Request line hook, invoked after a request line has been parsed.
    pub hook_request_line: TxHook,
    /// Receives raw request header data, starting immediately after the
    /// request line.
    pub hook_request_header_data: DataHook,
    /// Request headers hook, invoked after all request headers are seen.
    pub hook_request_headers: TxHook,
    /// Request body data hook, invoked every time body data is available.
    pub hook_request_body_data: DataHook,
    /// Receives raw request trailer data.
    pub hook_request_trailer_data: DataHook,
    /// Request trailer hook, invoked after all trailer headers are seen.
    pub hook_request_trailer: TxHook,
    /// Request file data hook, for files in multipart parts and PUT bodies.
    pub hook_request_file_data: FileDataHook,
    /// Request complete hook, invoked when the entire request is seen.
    pub hook_request_complete: TxHook,

    /// Response start hook, invoked when the parser receives the first
    /// byte of a new response.
    pub hook_response_start: TxHook,
    /// Response line hook, invoked after a response line has been parsed.
    pub hook_response_line: TxHook,
    /// Receives raw response header data.
    pub hook_response_header_data: DataHook,
    /// Response headers hook, invoked after all response headers are seen.
    pub hook_response_headers: TxHook,
    /// Response body data hook, invoked with decoded body data.
    pub hook_response_body_data: DataHook,
    /// Receives raw response trailer data.
    pub hook_response_trailer_data: DataHook,
    /// Response trailer hook, invoked after all trailer headers are seen.
    pub hook_response_trailer: TxHook,
    /// Response complete hook, invoked when the entire response is seen.
    pub hook_response_complete: TxHook,

    /// Transaction start hook, invoked as a transaction is created.
    pub hook_transaction_start: TxHook,
    /// Transaction complete hook, invoked once both the request and the
    /// response are complete.
    pub hook_transaction_complete: TxHook,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            field_limit: 18000,
            log_level: HtpLogLevel::NOTICE,
            server_personality: HtpServerPersonality::MINIMAL,
            response_decompression_enabled: true,
            parse_request_cookies: true,
            parse_request_auth: true,
            parse_multipart: false,
            multipart_boundary_case_insensitive: false,
            extract_request_files: false,
            extract_request_files_limit: 16,
            tmpdir: "/tmp".to_string(),
            hook_request_start: TxHook::new(),
            hook_request_line: TxHook::new(),
            hook_request_header_data: DataHook::new(),
            hook_request_headers: TxHook::new(),
            hook_request_body_data: DataHook::new(),
            hook_request_trailer_data: DataHook::new(),
            hook_request_trailer: TxHook::new(),
            hook_request_file_data: FileDataHook::new(),
            hook_request_complete: TxHook::new(),
            hook_response_start: TxHook::new(),
            hook_response_line: TxHook::new(),
            hook_response_header_data: DataHook::new(),
            hook_response_headers: TxHook::new(),
            hook_response_body_data: DataHook::new(),
            hook_response_trailer_data: DataHook::new(),
            hook_response_trailer: TxHook::new(),
            hook_response_complete: TxHook::new(),
            hook_transaction_start: TxHook::new(),
            hook_transaction_complete: TxHook::new(),
        }
    }
}

impl Config {
    /// Registers a request_start callback.
    pub fn register_request_start(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_request_start.register(cbk_fn);
    }

    /// Registers a request_line callback.
    pub fn register_request_line(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_request_line.register(cbk_fn);
    }

    /// Registers a request_header_data callback.
    pub fn register_request_header_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_request_header_data.register(cbk_fn);
    }

    /// Registers a request_headers callback.
    pub fn register_request_headers(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_request_headers.register(cbk_fn);
    }

    /// Registers a request_body_data callback.
    pub fn register_request_body_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_request_body_data.register(cbk_fn);
    }

    /// Registers a request_trailer_data callback.
    pub fn register_request_trailer_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_request_trailer_data.register(cbk_fn);
    }

    /// Registers a request_trailer callback.
    pub fn register_request_trailer(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_request_trailer.register(cbk_fn);
    }

    /// Registers a request_file_data callback.
    pub fn register_request_file_data(&mut self, cbk_fn: crate::hook::FileDataCallbackFn) {
        self.hook_request_file_data.register(cbk_fn);
    }

    /// Registers a request_complete callback.
    pub fn register_request_complete(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_request_complete.register(cbk_fn);
    }

    /// Registers a response_start callback.
    pub fn register_response_start(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_response_start.register(cbk_fn);
    }

    /// Registers a response_line callback.
    pub fn register_response_line(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_response_line.register(cbk_fn);
    }

    /// Registers a response_header_data callback.
    pub fn register_response_header_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_response_header_data.register(cbk_fn);
    }

    /// Registers a response_headers callback.
    pub fn register_response_headers(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_response_headers.register(cbk_fn);
    }

    /// Registers a response_body_data callback.
    pub fn register_response_body_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_response_body_data.register(cbk_fn);
    }

    /// Registers a response_trailer_data callback.
    pub fn register_response_trailer_data(&mut self, cbk_fn: crate::hook::DataCallbackFn) {
        self.hook_response_trailer_data.register(cbk_fn);
    }

    /// Registers a response_trailer callback.
    pub fn register_response_trailer(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_response_trailer.register(cbk_fn);
    }

    /// Registers a response_complete callback.
    pub fn register_response_complete(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_response_complete.register(cbk_fn);
    }

    /// Registers a transaction_start callback.
    pub fn register_transaction_start(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_transaction_start.register(cbk_fn);
    }

    /// Registers a transaction_complete callback.
    pub fn register_transaction_complete(&mut self, cbk_fn: crate::hook::TxCallbackFn) {
        self.hook_transaction_complete.register(cbk_fn);
    }

    /// Configures the server personality.
    pub fn set_server_personality(&mut self, personality: HtpServerPersonality) -> Result<()> {
        self.server_personality = personality;
        Ok(())
    }

    /// Configures the maximum size of the buffer used when the current
    /// input chunk does not contain all the necessary data.
    pub fn set_field_limit(&mut self, field_limit: usize) {
        self.field_limit = field_limit;
    }

    /// Enables or disables response body decompression.
    pub fn set_response_decompression(&mut self, enabled: bool) {
        self.response_decompression_enabled = enabled;
    }

    /// Enables or disables request cookie parsing.
    pub fn set_parse_request_cookies(&mut self, enabled: bool) {
        self.parse_request_cookies = enabled;
    }

    /// Enables or disables Authorization header parsing.
    pub fn set_parse_request_auth(&mut self, enabled: bool) {
        self.parse_request_auth = enabled;
    }

    /// Enables or disables multipart/form-data request body parsing.
    pub fn set_parse_multipart(&mut self, enabled: bool) {
        self.parse_multipart = enabled;
    }

    /// Selects whether multipart boundaries are matched case-insensitively.
    /// The default is exact matching.
    pub fn set_multipart_boundary_case_insensitive(&mut self, enabled: bool) {
        self.multipart_boundary_case_insensitive = enabled;
    }

    /// Enables or disables file extraction and sets the directory the
    /// extracted files are written to.
    pub fn set_extract_request_files(&mut self, enabled: bool, tmpdir: Option<&str>) {
        self.extract_request_files = enabled;
        if let Some(tmpdir) = tmpdir {
            self.tmpdir = tmpdir.to_string();
        }
    }
}
