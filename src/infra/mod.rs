// Infrastructure adapters shared by the provider integrations

pub mod http_client;

pub use http_client::HttpFetcher;
