pub mod api;
pub mod classify;
pub mod config;
pub mod db;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod manifest;
pub mod pipeline;
pub mod prompts;
pub mod reader;
pub mod render;
pub mod tasks;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_DB: &str = "db_query";
