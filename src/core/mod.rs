// Core modules: schema compilation, validation, query modeling, and error types.
pub mod coerce;
pub mod error;
pub mod field;
pub mod objectid;
pub mod partition;
pub mod query;
pub mod schema;
