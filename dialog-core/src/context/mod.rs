//! Per-session conversation memory.
//!
//! The context keeps, for every entity name, a bounded newest-first list of
//! [`EntityValue`]s, each stamped with the message counter and wall-clock
//! time at which it was set. On top of it, [`EntityQuery`] offers temporal,
//! provenance and correlation filters:
//!
//! ```rust,ignore
//! use dialog_core::context::{Context, TimeFilter};
//!
//! let mut ctx = Context::new();
//! ctx.set_value("intent", "greeting");
//! ctx.advance();
//! ctx.set_value("intent", "order");
//!
//! // "was it set this turn?"
//! assert_eq!(ctx.query("intent").current_value(), Some(&"order".into()));
//! // everything older than one message
//! let earlier = ctx.query("intent").older_than(TimeFilter::messages(0)).all_values();
//! ```

mod filter;
mod history;
mod query;
mod store;
mod value;

#[cfg(test)]
mod proptests;

pub use filter::{EntityFilter, FilterRule};
pub use history::{EntityHistory, StateVisit};
pub use query::{EntityQuery, TimeFilter};
pub use store::{
    Context, ContextDocument, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_DEPTH, ROLE_SEPARATOR,
};
pub use value::EntityValue;
