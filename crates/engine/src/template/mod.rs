//! Template rendering for action parameters and predicate expressions.

mod jinja;

pub use jinja::TemplateRenderer;
