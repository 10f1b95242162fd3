//! Read-only status queries over the tracking store

mod status;

pub use status::StatusQuery;
