pub mod error;
pub use error::Result;
pub use error::Error;

pub mod metadb;
pub use metadb::MetaDB;
pub use metadb::Package;
pub use metadb::PackageCatalog;

pub mod config;
pub use config::Config;

pub mod installation;
pub mod relationship_resolver;
pub mod game_instance;
pub use game_instance::GameInstance;
