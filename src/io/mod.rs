//! IO modules - external system interfaces
//!
//! This module contains all collaborator boundaries:
//! - `store` - Shared location store (transactions, subscription)
//! - `positioning` - Device position watch
//! - `geocoder` - Nominatim place search
//! - `briefing` - Gemini place briefings
//! - `notice` - Typed channel of user-facing notices
//! - `journal` - Saved check-ins to file (JSONL format)

pub mod briefing;
pub mod geocoder;
pub mod journal;
pub mod notice;
pub mod positioning;
pub mod store;

// Re-export commonly used types
pub use briefing::{BriefingService, GeminiClient};
pub use geocoder::{GeocodeResult, Geocoder, NominatimClient};
pub use journal::{Journal, JournalEntry};
pub use notice::{create_notice_channel, Notice, NoticeSender};
pub use positioning::{create_position_feed, FeedPositioning, PositionFeed, PositionFix, PositionUpdate, Positioning};
pub use store::{LocationStore, MemoryStore};
