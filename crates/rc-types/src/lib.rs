pub mod models;
pub mod target;
pub mod translit;
pub mod wire;

pub use target::Target;
