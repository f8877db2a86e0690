//! # CoVenture
//!
//! Realtime sync client for CoVenture, where young founders post projects,
//! apply to each other's teams and chat once paired. Usable both as the
//! `coventure` binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! coventure = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use coventure::app::App;
//! use coventure::config::ClientConfig;
//!
//! let app = App::init(ClientConfig::load(None)?)?;
//! let chat = app.chat()?;
//! chat.open(&project_id, &application_id).await?;
//! chat.send("Hi! When can we meet?").await?;
//! for message in chat.messages() {
//!     println!("{}: {}", message.sender_id, message.content);
//! }
//! ```
//!
//! The pieces, leaf to root: [`backend`] talks to the hosted platform (or a
//! local SQLite stand-in), [`realtime`] keeps one channel per scope alive,
//! [`store`] reconciles fetches, pushes and optimistic writes, and [`view`]
//! ties them together per screen.
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

pub mod app;
pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;
pub mod view;
