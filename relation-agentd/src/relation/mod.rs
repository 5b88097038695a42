pub mod aggregate;
pub mod hash;
pub mod source;
