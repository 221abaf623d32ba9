//! The display bridge engine.
//!
//! - **`framebuffer`**: the single shared pixel buffer and its lifecycle
//! - **`damage`**: EVDI damage rects to VNC modified regions
//! - **`engine`**: bridge state, mode negotiation, device event handling
//! - **`event_loop`**: startup, refresh-paced steady state, teardown

pub mod damage;
pub mod engine;
pub mod event_loop;
pub mod framebuffer;

pub use damage::DamageTranslator;
pub use engine::{ClientCounter, Engine, NegotiationState};
pub use event_loop::{io_timeout, Bridge};
pub use framebuffer::{FramebufferOwner, PixelBuffer, BUFFER_ID};
