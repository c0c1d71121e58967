//! # synapse-core
//!
//! Operations on a Synapse store: importing and installing packs, switching
//! the profile a UI sees, checking and applying updates, and the doctor and
//! garbage-collection maintenance passes.
//!
//! Everything goes through a [`Library`] opened on one store root:
//!
//! ```no_run
//! use synapse_config::Config;
//! use synapse_core::Library;
//!
//! # fn main() -> synapse_core::Result<()> {
//! let mut config = Config::default();
//! config.storage.root = "/srv/synapse".into();
//! let lib = Library::open(config)?;
//! lib.install_pack("portraits")?;
//! let switch = lib.profiles().use_pack("portraits", "comfyui")?;
//! println!("{} now sees {}", switch.ui, switch.profile);
//! # Ok(())
//! # }
//! ```

pub mod doctor;
mod error;
pub mod gc;
mod library;
pub mod profile;
pub mod resolve;
pub mod update;

pub use doctor::{BlobProblem, DoctorReport, StatusChange};
pub use error::{CoreError, FailureKind, ItemFailure, Result};
pub use gc::GcReport;
pub use library::{InstallReport, Library, PackSummary, StoreDocument, STORE_SCHEMA_VERSION};
pub use profile::{
    BackOutcome, PreparedSwitch, ProfileService, RebuildScope, SwitchReport, UiStatus,
};
pub use resolve::{
    AssetProvider, Candidate, DefaultFetcher, DirectProvider, FetchError, Fetcher, ProviderError,
    Resolution,
};
pub use update::{classify, PinChange, PlanEntry, UpdatePlan, UpdateResult, UpdateService};
