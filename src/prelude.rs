//! Prelude (helpful reexports) for this package

pub use crate::{
    core::AccessWidth,
    transport::{
        etherbone::Etherbone,
        mock::Mock,
        Transport,
    },
};
pub use etherbone::RetryPolicy;
