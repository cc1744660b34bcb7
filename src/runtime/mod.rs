pub mod context;
pub mod environment;
pub mod error;
pub mod field;
pub mod interpreter;
pub mod invocable;
pub mod resolver;
pub mod tuple;
pub mod value;
