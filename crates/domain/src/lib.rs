pub mod audit;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod policy;
pub mod ports;
pub mod request;
pub mod retry;
pub mod sanitize;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
