//! Template engine for the klusterlet manifests
//!
//! All templates are embedded in the binary and compiled once when the
//! engine is built, so a malformed template fails at startup instead of on
//! the first cluster that needs it.

use minijinja::{AutoEscape, Environment, UndefinedBehavior};

use super::context::KlusterletConfig;
use super::filters;
use crate::Error;

/// Separator written before every rendered document
pub const YAML_SEPARATOR: &str = "---\n";

/// Install manifests, in apply order
///
/// Namespace and RBAC come before the workloads that depend on them.
const INSTALL_TEMPLATES: &[(&str, &str)] = &[
    ("namespace.yaml", include_str!("manifests/namespace.yaml")),
    (
        "service_account.yaml",
        include_str!("manifests/service_account.yaml"),
    ),
    ("cluster_role.yaml", include_str!("manifests/cluster_role.yaml")),
    (
        "cluster_role_binding.yaml",
        include_str!("manifests/cluster_role_binding.yaml"),
    ),
    (
        "bootstrap_secret.yaml",
        include_str!("manifests/bootstrap_secret.yaml"),
    ),
    (
        "registration_deployment.yaml",
        include_str!("manifests/registration_deployment.yaml"),
    ),
    (
        "work_deployment.yaml",
        include_str!("manifests/work_deployment.yaml"),
    ),
];

/// CRDs the agents need before they start
const CRD_TEMPLATES: &[(&str, &str)] = &[
    (
        "appliedmanifestworks_crd.yaml",
        include_str!("manifests/appliedmanifestworks_crd.yaml"),
    ),
    (
        "clusterclaims_crd.yaml",
        include_str!("manifests/clusterclaims_crd.yaml"),
    ),
];

/// One of the fixed template lists shipped with the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateSet {
    /// Agent install manifests
    Install,
    /// CustomResourceDefinitions
    Crds,
}

impl TemplateSet {
    fn templates(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Install => INSTALL_TEMPLATES,
            Self::Crds => CRD_TEMPLATES,
        }
    }

    /// Template names in render order
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.templates().iter().map(|(name, _)| *name)
    }
}

/// Template engine holding the compiled manifest templates
///
/// Supports:
/// - Jinja syntax (`{{ }}`, `{% %}`)
/// - Strict undefined variable handling
/// - Custom filters (to_json, required)
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Compile every shipped template
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] naming the first template that fails to
    /// parse.
    pub fn new() -> Result<Self, Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);

        env.add_filter("to_json", filters::to_json);
        env.add_filter("required", filters::required);

        for &(name, source) in INSTALL_TEMPLATES.iter().chain(CRD_TEMPLATES) {
            env.add_template(name, source)
                .map_err(|e| Error::template(name, e.to_string()))?;
        }

        Ok(Self { env })
    }

    /// Render a single named template
    pub fn render(&self, name: &str, config: &KlusterletConfig) -> Result<String, Error> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| Error::template(name, e.to_string()))?;
        template
            .render(config)
            .map_err(|e| Error::template(name, format!("{:#}", e)))
    }

    /// Render a template set into one multi-document YAML blob
    ///
    /// Documents appear in the set's declared order, each prefixed with
    /// [`YAML_SEPARATOR`].
    pub fn render_set(&self, set: TemplateSet, config: &KlusterletConfig) -> Result<String, Error> {
        let mut out = String::new();
        for name in set.names() {
            let rendered = self.render(name, config)?;
            out.push_str(YAML_SEPARATOR);
            out.push_str(rendered.trim_end());
            out.push('\n');
        }
        Ok(out)
    }
}
