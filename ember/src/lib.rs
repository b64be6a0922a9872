mod context;
mod pipeline;

pub use context::{ContextConfig, RenderContext};
pub use pipeline::{FrameBuilder, FrameError, Pipeline};

pub use paste::paste;

macro_rules! module_facade {
    ($name:ident) => {
        $crate::paste! {
            pub mod $name {
                pub use [<ember_ $name>]::*;
            }
        }
    };
}

module_facade!(core);
module_facade!(rhi);
module_facade!(render);
module_facade!(renderer);
module_facade!(rendergraph);
