pub mod cli;
pub mod config;
pub mod purchase;
pub mod skins;

pub use config::{Ctx, Env, LogLevel, setup_tracing};
pub use purchase::{
    PurchaseError, PurchaseErrorKind, PurchaseOrchestrator, PurchaseOutcome, PurchaseReceipt,
};
