pub mod events;
pub mod models;

pub use events::{Patch, RemoteUpdate, RoomChange};
pub use models::{Location, MessageKind, MessageRecord, Reactions, RoomSummary};
