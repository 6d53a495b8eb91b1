pub mod cache;
pub mod model;
pub mod render;

pub use cache::{IntrospectionError, SchemaCache};
pub use model::{Column, ForeignKey, Row, SchemaSnapshot, Table};
