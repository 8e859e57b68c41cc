pub mod admin;
pub mod principal;
