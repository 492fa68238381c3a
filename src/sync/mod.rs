//! Client-side board synchronization.
//!
//! A `BoardSession` keeps one client's view of a retro consistent with a
//! multi-writer change feed. Relocations are applied locally at once and
//! written in the background; the writer's own echo of that write is
//! recognised and discarded so it is not applied twice.
//!
//! | Module    | Responsibility                                            |
//! |-----------|-----------------------------------------------------------|
//! | `state`   | `BoardState`: comments plus pending-echo bookkeeping      |
//! | `session` | `BoardSession`: mount, writes, event loop                 |
//! | `store`   | `RetroStore` trait and the RAII `FeedSubscription`        |
//! | `local`   | `LocalStore`: in-process store over the board service     |
//! | `http`    | `HttpStore`: REST client with an NDJSON change stream     |

pub mod http;
pub mod local;
pub mod session;
pub mod state;
pub mod store;

pub use session::{BoardEvent, BoardSession, WriteOp};
pub use state::{Applied, BoardState};
pub use store::{FeedSubscription, RetroStore};
