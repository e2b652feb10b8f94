//! Order domain model
pub mod aggregates;
pub mod events;
pub mod records;
pub mod value_objects;
