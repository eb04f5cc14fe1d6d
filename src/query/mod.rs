pub mod builder;
pub mod clause;

pub use builder::{QueryBuilder, QueryOutput};
pub use clause::{Field, FieldValue, IntoColumns, Order, QueryType, TableRef};
