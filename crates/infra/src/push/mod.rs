//! Push Gateway: authenticated HTTP calls to tenant backends.

pub mod gateway;

pub use gateway::{
    PushConfig, PushConfigError, PushEndpoint, PushGateway, PushMethod, PushOutcome, PushRequest,
};
