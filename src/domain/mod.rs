pub mod image;
pub mod product;
pub mod session;
pub mod user;
