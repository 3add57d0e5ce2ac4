pub mod mail;
pub mod repositories;
