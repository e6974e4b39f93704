//! # Repository Layer
//!
//! Repositories encapsulate SeaORM operations for database entities. The
//! connection repository is the credential record store: the only shared
//! mutable resource in the service, with upsert-by-key semantics.

pub mod connection;

pub use connection::ConnectionRepository;
