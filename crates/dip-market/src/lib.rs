//! Exchange-facing plumbing for the dip bot.
//!
//! - `clock`: period boundary math and ET-localised slug fragments
//! - `catalog`: slug construction and market token resolution
//! - `orderbook`: per-window dual-side ladders with partial-update merge
//! - `stream`: the CLOB push connection, token routing, and window rotation
//! - `types`: wire shapes with tolerant decoders

pub mod catalog;
pub mod clock;
pub mod orderbook;
pub mod stream;
pub mod types;

pub use catalog::{slug_for, winning_side, CatalogConfig, CatalogError, MarketCatalog};
pub use clock::{current_period_start, ms_until_next_boundary, period_start, SlugFragments};
pub use orderbook::{BookUpdate, FillEstimate, Orderbook, PairBooks, SideBook};
pub use stream::{
    StreamClient, StreamCommand, StreamConfig, StreamError, StreamEvent, TokenIndex, TokenRoute,
};
pub use types::{GammaMarket, LevelMsg, PriceChange, StreamMessage, SubscribeMessage};
