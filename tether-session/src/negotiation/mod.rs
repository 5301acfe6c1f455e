mod coordinator;
mod state;

pub use coordinator::NegotiationCoordinator;
pub use state::NegotiationState;
