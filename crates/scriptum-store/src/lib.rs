//! Scriptum Store - versioned object storage for hosted scripts
//!
//! Callers register live values under human-readable names. Every stored
//! object carries a monotonically increasing version derived from the
//! value's own capabilities (structural hashing or change notification),
//! so a reader can tell at a glance whether the thing behind a handle has
//! changed since it last looked. The scripting layer binds parameters
//! against these entries by handle name.

mod codec;
mod error;
mod handle;
mod payload;
mod store;
mod value;
mod version;

pub use codec::*;
pub use error::*;
pub use handle::*;
pub use payload::*;
pub use store::*;
pub use value::*;
pub use version::*;
