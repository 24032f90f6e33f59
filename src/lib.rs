//! a11y-relay — capture accessibility-relevant DOM signals from a page and
//! relay them, in order and without loss, to an inspection surface.
//!
//! Capture side: `dom::Page` → `lifecycle::CaptureAgent` (classifier, text
//! navigation index, readiness gate). Hub: `coordinator` with one
//! `mailbox` per tab. Inspection side: `inspector` polls the mailbox and
//! renders each event once. `relay` carries every message between them.

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod dom;
pub mod event;
pub mod inspector;
pub mod lifecycle;
pub mod mailbox;
pub mod queue;
pub mod relay;
pub mod runtime;
pub mod scenario;
pub mod textnav;
