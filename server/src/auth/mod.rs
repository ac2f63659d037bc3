pub mod gate;
pub mod identity;
pub mod jwt;
