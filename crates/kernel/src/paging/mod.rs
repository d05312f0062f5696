//! Keyset-paginated listings.
//!
//! A listing request is turned into a [`QueryPlan`], executed by a
//! [`RowSource`] and answered with a page of rows plus the request for the
//! page after it.

mod plan;
mod request;
mod service;
mod source;

pub use plan::{FilterPart, PlanKind, QueryPlan};
pub use request::{CountFilteredRequest, CountResponse, LimitedFilteredRequest, PaginatedResponse};
pub use service::PageService;
pub use source::{MemoryRowSource, PgRowSource, RowSource};
