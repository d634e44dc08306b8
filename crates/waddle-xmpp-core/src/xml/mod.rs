//! XML fragment model, builder and namespace-resolving renderer.

mod builder;
mod fragment;
mod parse;
mod renderer;
mod resolver;

pub use builder::ElementBuilder;
pub use fragment::{attribute_sets_equal, is_valid_name, Attribute, Element, Fragment, NO_NAMESPACE};
pub use renderer::{escape_attribute, escape_text, render, render_to_string, Rendered};
pub use resolver::NamespaceResolver;
