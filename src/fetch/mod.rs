//! Getting records off the platform
//!
//! Filters are compiled by [`query::QueryBuilder`], pages are pulled by
//! [`pager::PaginatedFetcher`] over a [`transport::Transport`], and each page
//! is reduced to its record array by [`normalize::normalize`].

pub mod normalize;
pub mod pager;
pub mod query;
pub mod transport;

pub use normalize::{normalize, Endpoint, PageMeta, Resource};
pub use pager::{Page, PaginatedFetcher};
pub use query::{Clause, FilterSet, QueryBuilder};
pub use transport::{HttpResponse, HttpTransport, RecordedRequest, ScriptedTransport, Transport};
