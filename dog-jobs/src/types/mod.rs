pub mod ids;
pub mod item;
pub mod options;
pub mod priority;
pub mod events;

pub use ids::{JobId, LockToken};
pub use item::{ItemHandle, ItemRecord, ItemStatus, NewItem};
pub use options::{Backoff, ItemOptions, RECOGNIZED_OPTIONS};
pub use priority::JobPriority;
pub use events::JobEvent;
