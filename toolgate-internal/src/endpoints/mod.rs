pub mod fallback;
pub mod retention;
pub mod session;
pub mod status;
pub mod tools;
