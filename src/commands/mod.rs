pub mod evaluate;
pub mod generate;
pub mod gold;
pub mod metadata;
