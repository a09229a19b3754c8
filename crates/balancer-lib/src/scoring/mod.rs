//! Node scoring and selection

mod scorer;
mod selector;

pub use scorer::{NodeScore, NodeScorer};
pub use selector::NodeSelector;
