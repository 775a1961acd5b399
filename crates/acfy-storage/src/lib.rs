//! Store of record and HTTP transport for AutoContentify.

pub mod db;
pub mod http;

pub use db::{Database, StoreCounts};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition, SimpleTokenBucket, TokenBucketConfig,
};

pub const CRATE_NAME: &str = "acfy-storage";
