//! Container engines backing `dot-core`.

mod docker;
pub use docker::DockerEngine;

mod error;

pub mod prelude {
    pub use crate::DockerEngine;
    pub use dot_core::{ContainerEngine, EngineError};
}
