mod mesh_coordinator;

pub use mesh_coordinator::MeshCoordinator;
pub(crate) use mesh_coordinator::SignalNotice;
