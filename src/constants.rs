pub mod network {
    pub const TIMEOUT_REQUEST_MS: u64 = 10_000;
    pub const MAX_REDIRECTS: usize = 21;
    pub const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;
    pub const USER_AGENT: &str = "http-tool/0.3.0";
}

pub mod pagination {
    pub const MAX_REQUESTS: usize = 100;
    pub const REQUEST_INTERVAL_MS: u64 = 0;
}

pub mod batching {
    pub const BATCH_SIZE: i64 = 50;
    pub const BATCH_INTERVAL_MS: u64 = 1_000;
}

pub mod optimize {
    pub const MAX_LENGTH: usize = 1_000;
    pub const TRUNCATION_MARKER: &str = "... [truncated]";
    pub const DEFAULT_CSS_SELECTOR: &str = "body";
    pub const BINARY_NOT_SUPPORTED: &str = "Binary data is not supported";
    pub const BINARY_CONTENT_TYPES: &[&str] = &[
        "image/",
        "audio/",
        "video/",
        "font/",
        "application/octet-stream",
        "application/pdf",
        "application/zip",
        "application/gzip",
        "application/x-tar",
        "application/x-7z-compressed",
    ];
}

pub mod protocols {
    pub const ALLOWED_HTTP: &[&str] = &["http:", "https:"];
}

pub mod env {
    pub const CONFIG_PATH: &str = "HTTP_TOOL_CONFIG";
    pub const MAX_CAPTURE_BYTES: &str = "HTTP_TOOL_MAX_CAPTURE_BYTES";
    pub const TRACE_PATH: &str = "HTTP_TOOL_TRACE_PATH";
    pub const CREDENTIAL_PREFIX: &str = "HTTP_TOOL_CREDENTIAL_";
}
