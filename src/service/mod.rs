//! Business services: input validation and single-store-interaction
//! operations over the two collections. Services hold no state between
//! requests beyond the injected store handle.

mod tasks;
mod users;

pub use tasks::TaskService;
pub use users::UserService;

use crate::error::{Error, Result};

/// Reject a missing or empty required field, returning the value otherwise.
/// `field` is the wire name, so the error message matches what the client
/// sent.
pub(crate) fn require<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::missing_field(field)),
    }
}
