pub mod data_path;
pub mod expression;
pub mod output;
pub mod placeholders;
pub mod redact;
pub mod relaxed_json;
pub mod template;
pub mod text;
