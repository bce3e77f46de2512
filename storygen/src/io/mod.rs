//! Side-effecting collaborators: configuration, the generation process, prompt
//! rendering and story storage.

pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod store;
