// Quillpad session core

pub mod autosave;
pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod events;
pub mod file_manager;
pub mod memory;
pub mod recovery;
pub mod recovery_area;
pub mod scheduler;
pub mod session_store;
pub mod settings;

pub use config::Config;
pub use controller::{BulkClose, SessionController, StartupReport};
pub use document::{DocumentState, DocumentStatus};
pub use error::{EditorError, Result};
pub use events::{EventBus, SessionEvent, SubscriptionId};
pub use recovery::{RecoveryOffer, RecoveryOutcome};
pub use scheduler::{IntervalScheduler, Job, ManualScheduler, Scheduler};
