//! A small item service: create, list, read, patch and delete items over HTTP.
//!
//! Requests flow from the handlers in [`feature`] through a request scoped
//! service and unit of work down to a [`store::DocumentStore`].

pub mod feature;
pub mod infra;
pub mod server;
pub mod store;
