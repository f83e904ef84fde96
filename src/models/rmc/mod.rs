pub mod model;
pub mod sets_and_parameters;

pub use model::{BuildError, Fallback, RmcModel, SlackKey, Table, Variables};
