//! Signing, submission and confirmation.

pub mod coordinator;
pub mod outcome;
pub mod poller;

pub use coordinator::{SubmissionCoordinator, SubmitError, SubmitOutcome, SubmittedUnit, UnitStatus};
pub use outcome::{SubmissionOutcome, UnitId};
pub use poller::{interpret_bundle_status, interpret_signature_status, ConfirmationPoller};
