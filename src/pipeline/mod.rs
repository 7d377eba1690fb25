pub mod completion;
pub mod negotiation;
pub mod scheduler;
pub mod session;
pub mod stats;

pub use completion::{completion_channel, CompletionNotifier, CompletionWaiter};
pub use negotiation::{interval_ms_from_ticks, FrameInfo, FrameTable, Negotiator};
pub use scheduler::{PacingPolicy, PacingScheduler, PacingTiming, Step};
pub use session::{Session, SharedParams, StreamParams, StreamingState};
pub use stats::{SlotStats, StatsSnapshot};
