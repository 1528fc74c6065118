//! # huddle-client
//!
//! One participant's side of a Huddle session. [`Session::connect`] claims
//! a username on the control server, binds one UDP socket per media relay
//! and starts the workers:
//! - **control reader / writer**: server records in, client records out
//! - **video sender / receiver**: screen or camera frames, presenter inference
//! - **audio sender / receiver**: PCM chunks
//! - **file sender**: one background task per upload
//!
//! Everything the presentation layer needs arrives as a [`ClientEvent`].

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod presenter;
pub mod session;
pub mod state;
pub mod transfer;
pub mod workers;

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{ClientEvent, EventReceiver};
pub use presenter::PresenterTracker;
pub use session::{Devices, Session};
pub use state::MediaControls;
