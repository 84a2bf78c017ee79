pub mod api;
pub mod client;
pub mod etag;

pub use api::{GameApi, MutationRequest, SnapshotFetch, WsToken};
pub use client::HttpGameApi;
