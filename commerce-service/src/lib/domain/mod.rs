pub mod access;
pub mod errors;
pub mod mail;
pub mod resource;
pub mod user;
