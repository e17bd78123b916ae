pub mod results;

pub use results::{ResultPaths, ResultStore};
