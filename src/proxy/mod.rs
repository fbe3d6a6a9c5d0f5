pub mod client;

pub use client::{ProxyClient, Upstream, UpstreamSet};
