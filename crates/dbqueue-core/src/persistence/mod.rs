//! Storage contract and built-in implementations

mod dao;
mod memory;

pub use dao::{DaoError, TaskDao, TaskTransaction};
pub use memory::InMemoryTaskDao;
