//! Training-side workflow for the deepsight vision client: create a
//! workspace, build a stream's tool chain, fill the image database, label
//! views, tune parameters, train with progress polling, and export the
//! result as a runtime archive.
//!
//! Training is a separate vendor interface (runtime-only licenses exist);
//! a session must be opened with [`deepsight_client::Session::open_training`]
//! for any of this to be available.

mod status;
mod workspace;

pub use status::ToolStatus;
pub use workspace::TrainingWorkspace;
