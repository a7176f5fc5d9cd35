pub mod apply;
pub mod extract;
pub mod normalize;
pub mod package;
pub mod span;
pub mod styles;
pub mod translate;
pub mod xml;
