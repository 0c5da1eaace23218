//! Borealis' Render Hardware Interface
//!
//! This is an interface to the GPU which has been designed for engines that want explicit
//! control without carrying a full driver abstraction themselves. Resources are named by
//! generational [`Handle`]s minted by a [`Device`]; work is recorded CPU-side into
//! [`CommandList`]s and only touches the driver when a list is submitted to a queue. The
//! only host-blocking points are fence waits and immediate submits - everything else is
//! fire-and-forget from the CPU's point of view.
//!
//! The interface is split into a backend-independent core (handles, pools, the command
//! recorder, the transition table, the frame ring) and one module per backend that realizes
//! the [`Device`] trait on a concrete driver.

pub mod handle;
pub mod pool;

mod cache;
mod command;
mod deferred;
mod frame;
mod rhi_enums;
mod rhi_structs;
mod rhi_traits;
mod transition;
mod unique;

pub mod vulkan;

pub use self::cache::LayoutCache;
pub use self::command::{Command, CommandList, CommandListState};
pub use self::deferred::DeferredQueue;
pub use self::frame::{FrameContext, FrameRecord, FRAMES_IN_FLIGHT};
pub use self::handle::*;
pub use self::pool::ResourcePool;
pub use self::rhi_enums::*;
pub use self::rhi_structs::*;
pub use self::rhi_traits::*;
pub use self::transition::{transition_masks, TransitionMasks};
pub use self::unique::{Destroy, UniqueHandle};
