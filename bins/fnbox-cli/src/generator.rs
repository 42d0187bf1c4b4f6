// Dockerfile generation from handlebars templates

use anyhow::{Context, Result};
use fnbox_engine::LanguageConfig;
use handlebars::Handlebars;
use serde_json::json;

const PYTHON_TEMPLATE: &str = r#"# GENERATED BY fnbox-cli, DO NOT EDIT
# Python runtime for fnbox functions
FROM python:{{version}}-slim

ENV PYTHONUNBUFFERED=1 \
    PYTHONDONTWRITEBYTECODE=1 \
    PIP_NO_CACHE_DIR=1

WORKDIR {{workdir}}

RUN useradd -m -u 1000 fnbox
USER fnbox

CMD ["{{command}}"]
"#;

const NODE_TEMPLATE: &str = r#"# GENERATED BY fnbox-cli, DO NOT EDIT
# Node.js runtime for fnbox functions
FROM node:{{version}}-slim

ENV NODE_ENV=production

WORKDIR {{workdir}}

USER node

CMD ["{{command}}"]
"#;

const GENERIC_TEMPLATE: &str = r#"# GENERATED BY fnbox-cli, DO NOT EDIT
FROM {{name}}:{{version}}

WORKDIR {{workdir}}

CMD ["{{command}}"]
"#;

pub struct TemplateGenerator {
    handlebars: Handlebars<'static>,
}

impl TemplateGenerator {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // Dockerfiles are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars
            .register_template_string("python", PYTHON_TEMPLATE)
            .context("Failed to register python template")?;
        handlebars
            .register_template_string("javascript", NODE_TEMPLATE)
            .context("Failed to register javascript template")?;
        handlebars
            .register_template_string("generic", GENERIC_TEMPLATE)
            .context("Failed to register generic template")?;

        Ok(Self { handlebars })
    }

    pub fn generate_dockerfile(&self, language: &LanguageConfig) -> Result<String> {
        let template = match language.name.as_str() {
            "python" => "python",
            "javascript" | "node" => "javascript",
            _ => "generic",
        };

        let data = json!({
            "name": language.name,
            "version": language.version,
            "command": language.command,
            "workdir": fnbox_engine::runner::CONTAINER_WORKDIR,
        });

        self.handlebars
            .render(template, &data)
            .with_context(|| format!("Failed to render Dockerfile for {}", language.name))
    }
}
