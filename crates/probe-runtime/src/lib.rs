#![doc = "Latency probe runtime: cooperative scheduler, probe core, wire codec and collector."]

pub mod collector;
pub mod network;
pub mod node;
pub mod probe;
pub mod scheduler;
pub mod wire;

pub use collector::*;
pub use network::*;
pub use node::*;
pub use probe::*;
pub use scheduler::*;
pub use wire::*;
