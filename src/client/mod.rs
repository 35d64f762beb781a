//! Client side of the proxy: the generation workflow, the results editor with its local
//! drafts, and the post calendar.

pub mod api;
pub mod calendar;
pub mod drafts;
pub mod editor;
pub mod local_store;
pub mod preferences;
pub mod workflow;

pub use api::{ContentApi, ProxyClient};
pub use calendar::{Calendar, CalendarEntry};
pub use drafts::{Draft, DraftCache};
pub use editor::{ResultsEditor, Section};
pub use local_store::{FileKv, KeyValueStore, MemoryKv};
pub use preferences::Preferences;
pub use workflow::{Notification, NoticeKind, Screen, Workflow};
