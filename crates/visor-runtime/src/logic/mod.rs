//! Router Logic Module
//!
//! This module contains the router task implementation split into focused
//! components:
//! - `state`: Router application state and statistics
//! - `handlers`: Command and event handlers
//! - `task`: Main Router implementation and coordination
//!
//! ## Architecture Design Trade-offs
//!
//! ### The Single Router Task
//!
//! **Current Design**: All routing decisions are serialized through one
//! `Router` task that owns all orchestration state: the app catalog, the
//! believed-running set, the cloud session state, the connected central and
//! the loopback flag. Commands from the embedder and events from the three
//! transports are processed sequentially in a single async event loop.
//!
//! **Benefits of This Approach:**
//! - **Eliminates Race Conditions**: The running set, the cloud flag and the
//!   manager path selection each have exactly one writer
//! - **Prevents Deadlocks**: No locks around orchestration state at all
//! - **Simplifies Reasoning**: Interleavings like "central disconnects while
//!   a start command is mid-flight" become ordinary message orderings
//! - **Easier Testing**: Handlers are synchronous functions from state and
//!   input to effects and app events
//!
//! **Potential Performance Bottleneck:**
//! Every wireless frame, bus message and cloud message crosses this task.
//! The messages are small and the handlers do no I/O (platform calls are
//! local queries), so the loop is expected to stay far from saturation on
//! target hardware. Audio is the one volume-heavy flow, and it deliberately
//! bypasses the router entirely on its own channel.
//!
//! **When to Consider Decomposition:**
//! Only if profiling shows the router saturated; the likely first cut would
//! move transcript fan-out into its own task, since it is the only handler
//! whose output scales with subscriber count.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::RouterHandlers;
pub use state::{CloudSessionState, RouterState, RouterStats, SpeechSubscription};
pub use task::Router;
