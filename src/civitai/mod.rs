pub(crate) mod io;
pub(crate) mod pipeline;
pub(crate) mod politeness;
pub(crate) mod progress;
pub(crate) mod query;
pub(crate) mod script;
pub(crate) mod sender;
pub(crate) mod session;
pub(crate) mod tui;
pub(crate) mod worker;
