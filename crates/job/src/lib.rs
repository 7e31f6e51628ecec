//! Jobs bind a connected [`Transport`](mpc_network::Transport) to one
//! protocol run and own its lifetime.
//!
//! Protocol code only ever sees a [`JobChannel`]; engine adapters that need
//! integer handles go through a [`CallbackBridge`].

pub mod agree_random;
pub mod bridge;
pub mod channel;
pub mod error;
pub mod job;
pub mod protocol;
pub mod registry;

pub use agree_random::{agree_random, multi_agree_random, AgreeRandom, AgreeRandomError};
pub use bridge::{CallbackBridge, CallbackStatus};
pub use channel::JobChannel;
pub use error::{JobError, JobResult};
pub use job::{Job2P, JobMP};
pub use protocol::Protocol;
pub use registry::{Handle, HandleRegistry};
