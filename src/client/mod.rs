//! Client connection layer

pub mod command;
pub mod control_plane;
#[cfg(test)]
pub(crate) mod mock;
pub mod raw_connection;
pub mod serializer;

pub use command::Command;
pub use control_plane::{share, Connector, ControlPlane, ControlPlaneExt, SharedConnection};
pub use raw_connection::{ConnectionFactory, RawConnection};
pub use serializer::Serializer;
