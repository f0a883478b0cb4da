pub mod run;
pub mod setup;

pub use run::{ImageArgs, RunArgs};
pub use setup::SetupArgs;
