pub mod frame;
pub mod native;

pub use frame::{build_draw_list, merge_uniforms, DrawCall, ObjectUniform, PointVertex};
pub use native::{GraphicsUnavailable, Renderer};
