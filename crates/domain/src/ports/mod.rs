use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod audit;
pub mod queue;
pub mod scm;
pub mod secrets;
pub mod tickets;
