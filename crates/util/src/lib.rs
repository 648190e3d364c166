mod path_processing;
mod variables;

pub use path_processing::expand_tilde;
pub use variables::{substitute_value, substitute_variables};
