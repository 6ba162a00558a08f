//! Basket data model: configurations, canned responses and captured requests.
//!
//! ## Module Structure
//!
//! - `types`: basket/response configuration, page types, validation
//! - `record`: immutable captured-request snapshot and its search predicate

mod record;
mod types;

pub use record::{Headers, RequestData};
pub use types::{
    BasketAuth, BasketConfig, BasketConfigPatch, BasketNamesPage, BasketNamesQueryPage,
    RequestsPage, RequestsQueryPage, ResponseConfig, ResponseConfigPatch, ValidationError,
};
