pub mod credentials;
pub mod logger;
pub mod tool_config;
pub mod trace;
pub mod transport;
pub mod validation;
