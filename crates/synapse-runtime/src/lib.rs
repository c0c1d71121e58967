//! # synapse-runtime
//!
//! Everything that decides what a UI sees:
//! - Profile documents (ordered pack lists)
//! - View generation (symlink trees into the blob store)
//! - Per-UI runtime stacks and `active` pointers
//!
//! Stack, view and active pointer describe one fact, the current profile of
//! a UI. This crate provides the pieces; `synapse-core` sequences them under
//! the runtime lock.

pub mod active;
pub mod profile;
pub mod stack;
pub mod ui;
pub mod view;

pub use active::{point_active, read_active};
pub use profile::{work_profile_name, work_profile_pack, Profile, GLOBAL_PROFILE};
pub use stack::RuntimeState;
pub use ui::UiLayout;
pub use view::{
    view_links, MissingBlob, PackAsset, PackContents, Shadow, ViewBuilder, ViewPlan, ViewReport,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Layout(#[from] synapse_layout::LayoutError),

    #[error("Blob store error: {0}")]
    Cas(#[from] synapse_cas::CasError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
