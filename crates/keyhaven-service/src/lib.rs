//! Keyhaven vault service: session lifecycle, the credential store
//! mediator, the step-up verification gateway and the request dispatcher.

pub mod dispatch;
pub mod gateway;
pub mod identity;
pub mod mediator;
pub mod persistence;
pub mod service_state;
pub mod session;
