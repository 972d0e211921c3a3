use minijinja::{AutoEscape, Environment};

use super::{Envelope, ViewError};

/// Turns template source into an executable artifact.
///
/// This is the only thing that differs between view flavors; caching,
/// reloading and the data envelope live in [`View`](super::View).
pub trait Compile: Send + Sync + 'static {
    type Artifact: Send + Sync + 'static;

    /// Content type emitted with rendered output.
    fn content_type(&self) -> &'static str;

    fn compile(&self, name: &str, source: String) -> Result<Self::Artifact, ViewError>;

    /// Execute into `out`. On error `out` may hold partial output.
    fn execute(
        &self,
        artifact: &Self::Artifact,
        out: &mut Vec<u8>,
        data: &Envelope<'_>,
    ) -> Result<(), ViewError>;
}

/// A single parsed template together with the environment that owns it.
pub struct Compiled {
    env: Environment<'static>,
    name: String,
}

fn compile_with(name: &str, source: String, escape: AutoEscape) -> Result<Compiled, ViewError> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(move |_| escape.clone());
    env.add_template_owned(name.to_string(), source)
        .map_err(|source| ViewError::Compile {
            name: name.to_string(),
            source,
        })?;
    Ok(Compiled {
        env,
        name: name.to_string(),
    })
}

fn execute_with(artifact: &Compiled, out: &mut Vec<u8>, data: &Envelope<'_>) -> Result<(), ViewError> {
    let render_err = |source| ViewError::Render {
        name: artifact.name.clone(),
        source,
    };
    let template = artifact.env.get_template(&artifact.name).map_err(render_err)?;
    template.render_to_write(data, out).map_err(render_err)?;
    Ok(())
}

/// HTML views: values are escaped unless marked safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct Markup;

impl Compile for Markup {
    type Artifact = Compiled;

    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }

    fn compile(&self, name: &str, source: String) -> Result<Compiled, ViewError> {
        compile_with(name, source, AutoEscape::Html)
    }

    fn execute(&self, artifact: &Compiled, out: &mut Vec<u8>, data: &Envelope<'_>) -> Result<(), ViewError> {
        execute_with(artifact, out, data)
    }
}

/// Plain-text views: no escaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl Compile for PlainText {
    type Artifact = Compiled;

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn compile(&self, name: &str, source: String) -> Result<Compiled, ViewError> {
        compile_with(name, source, AutoEscape::None)
    }

    fn execute(&self, artifact: &Compiled, out: &mut Vec<u8>, data: &Envelope<'_>) -> Result<(), ViewError> {
        execute_with(artifact, out, data)
    }
}
