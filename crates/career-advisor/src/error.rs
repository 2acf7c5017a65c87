//! Error Types for Career Advisor

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Tool server command is empty")]
    EmptyCommand,

    #[error("Firecrawl API key is empty")]
    MissingApiKey,
}
