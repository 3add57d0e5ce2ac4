pub mod document;
pub mod memory;
mod sql;
pub mod user;

pub use document::PostgresDocumentRepository;
pub use memory::InMemoryDocumentRepository;
pub use memory::InMemoryUserRepository;
pub use user::PostgresUserRepository;
