//! # cellsync Kernel
//!
//! Everything between a document and the compute kernels that run its code:
//!
//! - [`wire`]: signed multipart kernel messages
//! - [`socket`] and [`transport`]: the command, control and broadcast channels
//! - [`platform`] and [`provisioner`]: container infrastructure per kernel
//! - [`orchestrator`] and [`bridge`]: kernel lifecycle and result bridging
//! - [`recycler`]: periodic enforcement of the maximum kernel lifetime

pub mod bridge;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod provisioner;
pub mod recycler;
pub mod socket;
pub mod transport;
pub mod wire;

pub use error::{KernelError, PlatformError, TransportError, WireError};
pub use orchestrator::{KernelDescriptor, KernelOrchestrator, OrchestratorSettings};
pub use platform::{ContainerPlatform, KubePlatform, PodUsage, ResourceKind};
pub use provisioner::{ContainerProvisioner, KernelEndpoint, KernelPorts, ProvisionSettings, Provisioner};
pub use recycler::Recycler;
pub use socket::{FrameSocket, SocketConnector, SocketKind, ZmqConnector};
pub use transport::{KernelTransport, Subscription, TransportEvent};
pub use wire::{Header, KernelMessage, WireCodec};
