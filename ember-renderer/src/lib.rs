//! Scene transversal: culling, light assignment and draw emission.

mod scene;
mod transversal;
mod view;

pub use scene::{BoundingSphere, Light, Renderable, SceneProvider};
pub use transversal::{QueueTransversalExt, SceneTransversal, TransversalPolicy};
pub use view::{Frustum, ViewDescriptor};
