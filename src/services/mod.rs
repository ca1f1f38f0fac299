pub mod auth;
pub mod form;
pub mod sequencer;
pub mod session;
pub mod transport;
pub mod ui;
