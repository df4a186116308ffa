use axum::response::Html;
use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

pub const INDEX: &str = "index";
pub const HOME: &str = "home";
pub const SIDEBAR: &str = "sidebar";
pub const DASHBOARD: &str = "dashboard";
pub const DATAFLOW_CONTENTS: &str = "dataflow_contents";

const PAGES: &[&str] = &[INDEX, HOME, SIDEBAR, DASHBOARD, DATAFLOW_CONTENTS];

#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    #[error("failed to load template: {0}")]
    Load(#[from] Box<handlebars::TemplateError>),
    #[error("failed to render template: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// HTML pages, loaded once at startup from the template directory.
pub struct Templates {
    registry: Handlebars<'static>,
}

impl Templates {
    /// Loads `{name}.html` for every page. Fails if any page is missing or
    /// does not parse.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);

        for name in PAGES {
            let path = dir.join(format!("{name}.html"));
            registry
                .register_template_file(name, &path)
                .map_err(Box::new)?;
            tracing::debug!(template = name, path = %path.display(), "registered template");
        }

        Ok(Templates { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<Html<String>, TemplateError> {
        Ok(Html(self.registry.render(name, data)?))
    }
}
