pub mod mapping;
pub mod tml;
