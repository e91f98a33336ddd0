mod client;
mod remote;

pub use client::{ApiErrorClass, RemoteError, RestClient};
pub use remote::{Filter, Query, RemoteStore, Row, row_str};
