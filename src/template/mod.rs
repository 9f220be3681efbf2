//! Klusterlet manifest templating
//!
//! The install bundle is rendered from a fixed, ordered set of YAML
//! templates embedded in the binary. Templates use Jinja syntax via
//! minijinja:
//!
//! - `{{ agent_namespace }}`, `{{ cluster_name }}` - Per-cluster values
//! - `{% if node_selector %}...{% endif %}` - Optional placement blocks
//! - Filters: `{{ value | to_json }}`, `{{ value | required }}`

mod context;
mod engine;
mod filters;

pub use context::KlusterletConfig;
pub use engine::{TemplateEngine, TemplateSet, YAML_SEPARATOR};
