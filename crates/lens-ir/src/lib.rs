//! Lens Intermediate Representation (IR)
//!
//! The schema graph a query is bound to, the validated query specification,
//! and the query plan the compiler produces from it. Everything here is plain
//! serializable data with no behaviour beyond lookup.

mod literal;
mod plan;
mod provider;
mod schema;
mod spec;
mod types;

pub use literal::*;
pub use plan::*;
pub use provider::*;
pub use schema::*;
pub use spec::*;
pub use types::*;
