//! Client for the external reasoning service ("oracle").
//!
//! Collaborators send prompts to named pipes and parse JSON completions.

mod client;
mod types;

pub use client::{parse_retry_after, Oracle, OracleClient};
pub use types::{
    extract_json, CreatePipeRequest, CreatePipeResponse, Message, MessageRole, PipeRequest,
    PipeResponse, RawResponse, Usage,
};
