//! Service layer

pub mod advisory;
pub mod buffer;
pub mod channel;
pub mod controller;
pub mod dispatcher;
pub mod events;
pub mod guard;
pub mod poller;
pub mod registry;

pub use advisory::{AdvisoryMatcher, SignatureMatcher, StartFailureAdvisor};
pub use buffer::OutputBuffer;
pub use channel::{ChannelEvent, StreamChannel};
pub use controller::SessionController;
pub use dispatcher::{CommandDispatcher, CommandHistory, CommandInput, DispatchOutcome};
pub use events::SessionEvent;
pub use guard::LifecycleGuard;
pub use poller::{PollOutcome, PollPolicy, RunStateSnapshot, StatusPoller};
pub use registry::SessionRegistry;
