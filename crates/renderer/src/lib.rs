//! Rendering for the terrain engine: CDLOD quadtree selection, the shared
//! patch grid, the instanced patch renderer and the cascaded shadow pass.

pub mod camera;
pub mod frustum;
pub mod grid;
pub mod pipeline;
pub mod quadtree;
pub mod shadow;
pub mod terrain;
pub mod texture;
pub mod vertex;

pub use camera::*;
pub use frustum::*;
pub use grid::*;
pub use pipeline::*;
pub use quadtree::*;
pub use shadow::*;
pub use terrain::*;
pub use texture::*;
pub use vertex::*;
