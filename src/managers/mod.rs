pub mod http_tool;
