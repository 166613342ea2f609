pub mod item;

pub use item::{Item, ItemVariant, ItemWithVariants, MediaType};
