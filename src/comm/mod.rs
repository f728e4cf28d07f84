//! Communication substrate: the `Communicator` façade, wire records, and the
//! collectives the pattern builder needs.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
