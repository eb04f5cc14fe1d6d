pub mod entity;
pub mod model;

pub use entity::{Column, Entity};
pub use model::{Model, Saved};
