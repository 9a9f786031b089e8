//! In-memory connection registry: snapshot, filter, sort, pages, favorites
//! and history clearing.

pub mod connections;
pub mod favorites;
pub mod filter;
pub mod history;
pub mod page;
pub mod sort;

pub use connections::{ConnectionRegistry, RegistryStats};
pub use favorites::FavoriteSet;
pub use filter::FilterSpec;
pub use history::{HistoryMarker, HistoryPeriod};
pub use page::{page_window, paginate, Page, DEFAULT_PAGE_SIZE, PAGE_WINDOW};
pub use sort::{SortColumn, SortDirection, SortSpec};
