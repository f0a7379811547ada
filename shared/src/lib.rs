pub mod protocol;
pub mod rows;
pub mod types;
