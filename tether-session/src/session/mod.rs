mod command;
mod driver;
mod error;
mod event;
mod handle;

pub use error::SessionError;
pub use event::SessionEvent;
pub use handle::Session;
